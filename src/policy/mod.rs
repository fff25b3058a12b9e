// Policy attachment: hooks giving external policies events and effector access

mod registry;

pub use registry::{PolicyFactory, PolicyRegistry};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::info;
use uuid::Uuid;

use crate::effector::Parameters;
use crate::entity::{Entity, EntityError};
use crate::sensor::{Sensor, SensorEvent};
use crate::subscription::{SensorEventListener, SubscriptionContext, SubscriptionHandle, SubscriptionScope};
use crate::task::Task;


/// An external reactive component attached to an entity.
///
/// Policies subscribe and act only through the [`PolicyHook`] they are given.
pub trait Policy: Send + Sync {
    fn display_name(&self) -> String;

    /// Called once on attachment; typically sets up subscriptions
    fn on_attach(&self, hook: &PolicyHook) -> anyhow::Result<()>;

    /// Called after the policy's subscriptions have been cancelled
    fn on_detach(&self, _hook: &PolicyHook) {}
}

/// Attachment point of one policy on one entity
pub struct PolicyHook {
    id: String,
    display_name: String,
    policy: Arc<dyn Policy>,
    entity: Weak<Entity>,
    subscriptions: SubscriptionContext,
    suspended: Arc<AtomicBool>,
    attached_at: DateTime<Utc>,
}

impl PolicyHook {
    /// Build the hook and run the policy's `on_attach`. A failing policy is
    /// left with no subscriptions.
    pub(crate) fn attach(entity: &Arc<Entity>, policy: Arc<dyn Policy>) -> Result<Arc<Self>, EntityError> {
        let management = entity.management()?;
        let id = format!("policy-{}", Uuid::now_v7());
        let display_name = policy.display_name();
        let hook = Arc::new(Self {
            subscriptions: management.subscription_context(&id),
            id,
            display_name,
            policy: Arc::clone(&policy),
            entity: Arc::downgrade(entity),
            suspended: Arc::new(AtomicBool::new(false)),
            attached_at: Utc::now(),
        });

        if let Err(e) = policy.on_attach(&hook) {
            hook.subscriptions.unsubscribe_all();
            return Err(EntityError::PolicyFailed {
                policy: hook.display_name.clone(),
                reason: e.to_string(),
            });
        }

        info!(
            policy_id = %hook.id,
            policy = %hook.display_name,
            entity_id = %entity.id(),
            "Policy attached"
        );
        Ok(hook)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn policy(&self) -> &Arc<dyn Policy> {
        &self.policy
    }

    /// Entity the policy is attached to; `None` once it has been dropped
    pub fn entity(&self) -> Option<Arc<Entity>> {
        self.entity.upgrade()
    }

    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.manager().count_for(&self.id)
    }

    pub fn subscribe<T, L>(&self, producer: &Entity, sensor: &Sensor<T>, listener: L) -> SubscriptionHandle
    where
        L: SensorEventListener + 'static,
    {
        self.subscribe_scope(SubscriptionScope::Entity(producer.id().to_string()), sensor.name(), listener)
    }

    pub fn subscribe_to_children<T, L>(&self, parent: &Entity, sensor: &Sensor<T>, listener: L) -> SubscriptionHandle
    where
        L: SensorEventListener + 'static,
    {
        self.subscribe_scope(SubscriptionScope::Children(parent.id().to_string()), sensor.name(), listener)
    }

    pub fn subscribe_to_members<T, L>(&self, group: &Entity, sensor: &Sensor<T>, listener: L) -> SubscriptionHandle
    where
        L: SensorEventListener + 'static,
    {
        self.subscribe_scope(SubscriptionScope::Members(group.id().to_string()), sensor.name(), listener)
    }

    /// Events are dropped while the hook is suspended
    pub fn subscribe_scope<L>(&self, scope: SubscriptionScope, sensor: &str, listener: L) -> SubscriptionHandle
    where
        L: SensorEventListener + 'static,
    {
        let suspended = Arc::clone(&self.suspended);
        self.subscriptions.subscribe_scope(scope, sensor, move |event: &SensorEvent| {
            if !suspended.load(Ordering::SeqCst) {
                listener.on_event(event);
            }
        })
    }

    /// Invoke an effector on `target`, always as a newly submitted task.
    ///
    /// Code already running inside an effector body should use
    /// `EffectorContext::invoke` or `Entity::invoke_from` so a call on the
    /// same entity runs inline.
    pub fn invoke(&self, target: &Arc<Entity>, effector: &str, arguments: Parameters) -> Result<Task, EntityError> {
        target.invoke(effector, arguments)
    }

    pub fn suspend(&self) {
        if !self.suspended.swap(true, Ordering::SeqCst) {
            info!(policy_id = %self.id, policy = %self.display_name, "Policy suspended");
        }
    }

    pub fn resume(&self) {
        if self.suspended.swap(false, Ordering::SeqCst) {
            info!(policy_id = %self.id, policy = %self.display_name, "Policy resumed");
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub(crate) fn detach(&self) {
        self.subscriptions.unsubscribe_all();
        self.policy.on_detach(self);
        info!(policy_id = %self.id, policy = %self.display_name, "Policy detached");
    }
}
