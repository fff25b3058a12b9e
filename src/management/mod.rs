// Management context: entity registry and shared runtime facilities

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::entity::{Entity, EntityError, EntityId, EntitySpec};
use crate::policy::PolicyRegistry;
use crate::subscription::{SubscriptionContext, SubscriptionManager};
use crate::task::{ExecutionContext, TaskExecutor, TaskTag};


/// Root of a deployment: owns every managed entity and the subscription bus,
/// task executor and policy registry they share.
pub struct ManagementContext {
    config: RuntimeConfig,
    /// Every managed entity, keyed by id
    entities: DashMap<EntityId, Arc<Entity>>,
    /// Subset of `entities` that are application roots
    applications: DashMap<EntityId, Arc<Entity>>,
    subscriptions: Arc<SubscriptionManager>,
    executor: Arc<TaskExecutor>,
    policy_types: PolicyRegistry,
}

impl ManagementContext {
    /// Create a context with its own task executor
    pub fn new(config: RuntimeConfig) -> anyhow::Result<Arc<Self>> {
        let executor = Arc::new(TaskExecutor::new(&config.executor)?);
        Ok(Self::with_executor(config, executor))
    }

    /// Create a context sharing an existing executor
    pub fn with_executor(config: RuntimeConfig, executor: Arc<TaskExecutor>) -> Arc<Self> {
        let subscriptions = Arc::new(SubscriptionManager::new(config.subscriptions.event_buffer));
        Arc::new(Self {
            config,
            entities: DashMap::new(),
            applications: DashMap::new(),
            subscriptions,
            executor,
            policy_types: PolicyRegistry::new(),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Construct and register an entity.
    ///
    /// Initial config is applied first, then the entity is linked under the
    /// spec's owner. If linking fails the entity is unregistered again.
    pub fn create_entity(self: &Arc<Self>, spec: EntitySpec) -> Result<Arc<Entity>, EntityError> {
        let id = self.unused_id();
        let entity = Arc::new_cyclic(|me| Entity::new(id.clone(), &spec, Arc::downgrade(self), me.clone()));

        self.entities.insert(id.clone(), Arc::clone(&entity));
        if entity.is_application() {
            self.applications.insert(id.clone(), Arc::clone(&entity));
        }

        let linked = entity.init_config(&spec.config).and_then(|_| match &spec.owner {
            Some(owner) => owner.add_owned_child(&entity).map(|_| ()),
            None => Ok(()),
        });
        if let Err(e) = linked {
            warn!(entity_id = %id, error = %e, "Entity creation failed");
            self.unregister(&id);
            return Err(e);
        }

        info!(
            entity_id = %id,
            name = %entity.display_name(),
            entity_type = %entity.entity_type().name(),
            application = entity.is_application(),
            "Entity created"
        );
        Ok(entity)
    }

    /// Get entity by ID
    pub fn entity(&self, id: &str) -> Option<Arc<Entity>> {
        self.entities.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Get all managed entities
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn applications(&self) -> Vec<Arc<Entity>> {
        self.applications
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Get count of managed entities
    pub fn count(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn unregister(&self, id: &str) {
        self.entities.remove(id);
        self.applications.remove(id);
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn policy_types(&self) -> &PolicyRegistry {
        &self.policy_types
    }

    /// Subscription context owned by `subscriber`
    pub fn subscription_context(&self, subscriber: &str) -> SubscriptionContext {
        SubscriptionContext::new(subscriber, Arc::clone(&self.subscriptions))
    }

    /// Execution context tagging tasks with `entity_id`
    pub fn execution_context(&self, entity_id: &str) -> ExecutionContext {
        ExecutionContext::new(
            Arc::clone(&self.executor),
            vec![TaskTag::Entity(entity_id.to_string())],
        )
    }

    fn unused_id(&self) -> EntityId {
        loop {
            let id = generate_entity_id(self.config.entities.id_length);
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Generate an entity ID of `len` random lowercase alphanumerics
fn generate_entity_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len.max(1))
        .map(|_| {
            let idx = rng.gen_range(0..36u8);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect()
}
