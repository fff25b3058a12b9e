use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entity::EntityId;
use crate::sensor::SensorEvent;

/// Which producers a subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "entity_id", rename_all = "snake_case")]
pub enum SubscriptionScope {
    /// A single producer entity
    Entity(EntityId),
    /// Current and future owned children of an entity
    Children(EntityId),
    /// Current and future members of a group entity
    Members(EntityId),
    /// Every producer
    Any,
}

impl SubscriptionScope {
    fn matches(&self, producer: &str, owner: Option<&str>, groups: &[EntityId]) -> bool {
        match self {
            SubscriptionScope::Entity(id) => id == producer,
            SubscriptionScope::Children(id) => owner == Some(id.as_str()),
            SubscriptionScope::Members(id) => groups.iter().any(|g| g == id),
            SubscriptionScope::Any => true,
        }
    }
}

/// Receiver of sensor change events
pub trait SensorEventListener: Send + Sync {
    fn on_event(&self, event: &SensorEvent);
}

impl<F> SensorEventListener for F
where
    F: Fn(&SensorEvent) + Send + Sync,
{
    fn on_event(&self, event: &SensorEvent) {
        self(event)
    }
}

struct Subscription {
    subscriber: String,
    scope: SubscriptionScope,
    sensor: String,
    listener: Arc<dyn SensorEventListener>,
}

/// Publish/subscribe registry routing sensor events to listeners.
///
/// Listeners run synchronously on the publishing thread, so a listener has
/// been notified by the time the publishing call returns. Every event is also
/// sent to a broadcast firehose for async observers.
pub struct SubscriptionManager {
    subscriptions: DashMap<Uuid, Subscription>,
    firehose: broadcast::Sender<SensorEvent>,
}

impl SubscriptionManager {
    pub fn new(event_buffer: usize) -> Self {
        let (firehose, _) = broadcast::channel(event_buffer.max(1));
        Self {
            subscriptions: DashMap::new(),
            firehose,
        }
    }

    /// Register `listener` for `sensor` on producers within `scope`.
    ///
    /// `subscriber` identifies who owns the subscription (an entity or a
    /// policy) for [`SubscriptionManager::unsubscribe_all`].
    pub fn subscribe(
        self: &Arc<Self>,
        subscriber: &str,
        scope: SubscriptionScope,
        sensor: &str,
        listener: Arc<dyn SensorEventListener>,
    ) -> SubscriptionHandle {
        let id = Uuid::now_v7();
        debug!(
            subscription_id = %id,
            subscriber = %subscriber,
            sensor = %sensor,
            scope = ?scope,
            "Subscription created"
        );
        self.subscriptions.insert(
            id,
            Subscription {
                subscriber: subscriber.to_string(),
                scope,
                sensor: sensor.to_string(),
                listener,
            },
        );
        SubscriptionHandle {
            id,
            manager: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Cancel every subscription owned by `subscriber`. Returns how many were removed.
    pub fn unsubscribe_all(&self, subscriber: &str) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, s| s.subscriber != subscriber);
        let removed = before.saturating_sub(self.subscriptions.len());
        if removed > 0 {
            debug!(subscriber = %subscriber, removed = removed, "Subscriptions cancelled");
        }
        removed
    }

    /// Deliver `event` to every matching listener. Returns the number notified.
    ///
    /// `owner` and `groups` describe the producer at publish time and resolve
    /// the children and members scopes.
    pub fn publish(&self, event: &SensorEvent, owner: Option<&str>, groups: &[EntityId]) -> usize {
        // Collect first: listeners may subscribe or unsubscribe while running
        let listeners: Vec<Arc<dyn SensorEventListener>> = self
            .subscriptions
            .iter()
            .filter(|e| {
                let s = e.value();
                s.sensor == event.sensor && s.scope.matches(&event.producer, owner, groups)
            })
            .map(|e| Arc::clone(&e.value().listener))
            .collect();

        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                warn!(
                    producer = %event.producer,
                    sensor = %event.sensor,
                    "Sensor event listener panicked"
                );
            }
        }

        // No firehose receivers is fine
        let _ = self.firehose.send(event.clone());

        listeners.len()
    }

    /// Convenience for building and publishing an event
    pub fn publish_value(
        &self,
        producer: &str,
        sensor: &str,
        old_value: Option<Value>,
        value: Value,
        owner: Option<&str>,
        groups: &[EntityId],
    ) -> usize {
        let event = SensorEvent {
            producer: producer.to_string(),
            sensor: sensor.to_string(),
            old_value,
            value,
            timestamp: Utc::now(),
        };
        self.publish(&event, owner, groups)
    }

    /// Receiver of every published event
    pub fn subscribe_all(&self) -> broadcast::Receiver<SensorEvent> {
        self.firehose.subscribe()
    }

    /// Every published event as an async stream; slow consumers see lag errors
    pub fn events(&self) -> BroadcastStream<SensorEvent> {
        BroadcastStream::new(self.firehose.subscribe())
    }

    pub fn count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn count_for(&self, subscriber: &str) -> usize {
        self.subscriptions
            .iter()
            .filter(|e| e.value().subscriber == subscriber)
            .count()
    }
}

/// Cancellation handle returned by every subscribe call
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    manager: Weak<SubscriptionManager>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns false if the subscription was already cancelled.
    pub fn unsubscribe(&self) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager.unsubscribe(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle").field("id", &self.id).finish()
    }
}
