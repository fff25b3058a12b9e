// Sensor event subscription management

mod context;
mod manager;

pub use context::SubscriptionContext;
pub use manager::{SensorEventListener, SubscriptionHandle, SubscriptionManager, SubscriptionScope};
