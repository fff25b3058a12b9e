use serde_json::Value;
use std::sync::Arc;

use super::{SensorEventListener, SubscriptionHandle, SubscriptionManager, SubscriptionScope};
use crate::entity::Entity;
use crate::sensor::{SensorEvent, Sensor};

/// Subscriber-scoped view of the subscription manager.
///
/// Each entity (and each attached policy) holds one; every subscription made
/// through it is owned by that subscriber and cancelled with it.
#[derive(Clone)]
pub struct SubscriptionContext {
    subscriber: String,
    manager: Arc<SubscriptionManager>,
}

impl SubscriptionContext {
    pub fn new(subscriber: impl Into<String>, manager: Arc<SubscriptionManager>) -> Self {
        Self {
            subscriber: subscriber.into(),
            manager,
        }
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    pub fn subscribe<T, L>(&self, producer: &Entity, sensor: &Sensor<T>, listener: L) -> SubscriptionHandle
    where
        L: SensorEventListener + 'static,
    {
        self.subscribe_scope(SubscriptionScope::Entity(producer.id().to_string()), sensor.name(), listener)
    }

    /// Listen to `sensor` on the current and future children of `parent`
    pub fn subscribe_to_children<T, L>(&self, parent: &Entity, sensor: &Sensor<T>, listener: L) -> SubscriptionHandle
    where
        L: SensorEventListener + 'static,
    {
        self.subscribe_scope(SubscriptionScope::Children(parent.id().to_string()), sensor.name(), listener)
    }

    /// Listen to `sensor` on the current and future members of `group`
    pub fn subscribe_to_members<T, L>(&self, group: &Entity, sensor: &Sensor<T>, listener: L) -> SubscriptionHandle
    where
        L: SensorEventListener + 'static,
    {
        self.subscribe_scope(SubscriptionScope::Members(group.id().to_string()), sensor.name(), listener)
    }

    pub fn subscribe_scope<L>(&self, scope: SubscriptionScope, sensor: &str, listener: L) -> SubscriptionHandle
    where
        L: SensorEventListener + 'static,
    {
        self.manager
            .subscribe(&self.subscriber, scope, sensor, Arc::new(listener))
    }

    /// Typed variant: the listener receives the decoded value, skipping events
    /// whose value does not decode as `T`.
    pub fn subscribe_value<T, F>(&self, producer: &Entity, sensor: &Sensor<T>, on_value: F) -> SubscriptionHandle
    where
        T: serde::de::DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let decoder = sensor.clone();
        self.subscribe(producer, sensor, move |event: &SensorEvent| {
            if let Some(v) = decoder.decode(event.value.clone()) {
                on_value(v);
            }
        })
    }

    pub fn unsubscribe_all(&self) -> usize {
        self.manager.unsubscribe_all(&self.subscriber)
    }

    pub fn publish(&self, producer: &Entity, sensor: &str, old_value: Option<Value>, value: Value) -> usize {
        self.manager.publish_value(
            producer.id(),
            sensor,
            old_value,
            value,
            producer.owner_id().as_deref(),
            &producer.group_ids(),
        )
    }
}
