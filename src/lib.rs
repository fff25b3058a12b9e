// Runtime configuration
pub mod config;

// Sensors and attribute storage
pub mod sensor;

// Sensor event pub/sub
pub mod subscription;

// Tasks and the worker pool
pub mod task;

// Effector descriptors and invocation
pub mod effector;

// Entity model: ownership tree, groups, config
pub mod entity;

// Entity registry and shared contexts
pub mod management;

// Policy attachment
pub mod policy;

// Management API for external facades
pub mod api;

pub use entity::{Entity, EntityError, EntitySpec, EntityType};
pub use management::ManagementContext;
