use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{info, warn};

use super::config::{ConfigKey, ConfigStore, ConfigValue};
use super::entity_type::EntityType;
use super::{EntityError, EntityId};
use crate::effector::{self, Effector, EffectorContext, Invocation, Parameters, RegisteredEffector};
use crate::management::ManagementContext;
use crate::policy::{Policy, PolicyHook};
use crate::sensor::{AttributeMap, Sensor, SensorDescriptor};
use crate::subscription::SubscriptionContext;
use crate::task::{ExecutionContext, Task, TaskContext};

/// A place an entity runs in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Location {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }
}

/// Everything needed to construct an entity
#[derive(Clone)]
pub struct EntitySpec {
    pub(crate) entity_type: Arc<EntityType>,
    pub(crate) display_name: Option<String>,
    pub(crate) owner: Option<Arc<Entity>>,
    pub(crate) config: Vec<(String, ConfigValue)>,
    pub(crate) locations: Vec<Location>,
    pub(crate) application: bool,
}

impl EntitySpec {
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self {
            entity_type,
            display_name: None,
            owner: None,
            config: Vec::new(),
            locations: Vec::new(),
            application: false,
        }
    }

    /// Spec for an application root
    pub fn application(entity_type: Arc<EntityType>) -> Self {
        Self {
            application: true,
            ..Self::new(entity_type)
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn owner(mut self, owner: &Arc<Entity>) -> Self {
        self.owner = Some(Arc::clone(owner));
        self
    }

    pub fn config<T>(mut self, key: &ConfigKey<T>, value: impl Into<Value>) -> Self {
        self.config
            .push((key.name().to_string(), ConfigValue::Value(value.into())));
        self
    }

    /// Config resolved by `task` once it completes
    pub fn config_task<T>(mut self, key: &ConfigKey<T>, task: Task) -> Self {
        self.config
            .push((key.name().to_string(), ConfigValue::Task(task)));
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.locations.push(location);
        self
    }
}

#[derive(Default)]
pub(super) struct TreeLinks {
    pub(super) owner: Option<Weak<Entity>>,
    pub(super) children: Vec<Arc<Entity>>,
}

#[derive(Default)]
pub(super) struct Memberships {
    pub(super) groups: Vec<Weak<Entity>>,
    pub(super) members: Vec<Weak<Entity>>,
}

/// A managed resource node.
///
/// Always held in an `Arc`. Owns its children; its owner, groups and
/// members are weak back-references.
pub struct Entity {
    id: EntityId,
    display_name: String,
    entity_type: Arc<EntityType>,
    is_application: bool,
    deployed: AtomicBool,
    destroyed: AtomicBool,
    management: Weak<ManagementContext>,

    /// Serializes owner assignment for this entity
    pub(super) ownership: Mutex<()>,
    pub(super) tree: Mutex<TreeLinks>,
    pub(super) memberships: Mutex<Memberships>,
    locations: Mutex<Vec<Location>>,

    attributes: AttributeMap,
    pub(super) config: ConfigStore,

    dynamic_sensors: Mutex<BTreeMap<String, SensorDescriptor>>,
    dynamic_effectors: Mutex<BTreeMap<String, RegisteredEffector>>,
    policies: Mutex<Vec<Arc<PolicyHook>>>,

    self_ref: Weak<Entity>,
    application: OnceLock<Weak<Entity>>,
    subscription_context: OnceLock<SubscriptionContext>,
    execution_context: OnceLock<ExecutionContext>,
}

impl Entity {
    pub(crate) fn new(
        id: EntityId,
        spec: &EntitySpec,
        management: Weak<ManagementContext>,
        self_ref: Weak<Entity>,
    ) -> Self {
        let display_name = spec
            .display_name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", spec.entity_type.name(), id));
        Self {
            id,
            display_name,
            entity_type: Arc::clone(&spec.entity_type),
            is_application: spec.application,
            deployed: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            management,
            ownership: Mutex::new(()),
            tree: Mutex::new(TreeLinks::default()),
            memberships: Mutex::new(Memberships::default()),
            locations: Mutex::new(spec.locations.clone()),
            attributes: AttributeMap::new(),
            config: ConfigStore::new(),
            dynamic_sensors: Mutex::new(BTreeMap::new()),
            dynamic_effectors: Mutex::new(BTreeMap::new()),
            policies: Mutex::new(Vec::new()),
            self_ref,
            application: OnceLock::new(),
            subscription_context: OnceLock::new(),
            execution_context: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn is_application(&self) -> bool {
        self.is_application
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(super) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::SeqCst)
    }

    /// Strong handle to this entity
    pub fn arc(&self) -> Option<Arc<Entity>> {
        self.self_ref.upgrade()
    }

    pub(crate) fn ensure_live(&self) -> Result<(), EntityError> {
        if self.is_destroyed() {
            return Err(EntityError::EntityDestroyed(self.id.clone()));
        }
        Ok(())
    }

    // ── Management and lazily-resolved contexts ───────────────────────────

    pub fn management(&self) -> Result<Arc<ManagementContext>, EntityError> {
        self.management
            .upgrade()
            .ok_or_else(|| EntityError::NotManaged(self.id.clone()))
    }

    /// Subscription context for this entity, created on first use
    pub fn subscriptions(&self) -> Result<&SubscriptionContext, EntityError> {
        if let Some(ctx) = self.subscription_context.get() {
            return Ok(ctx);
        }
        let management = self.management()?;
        Ok(self
            .subscription_context
            .get_or_init(|| management.subscription_context(&self.id)))
    }

    /// Execution context tagging tasks with this entity, created on first use
    pub fn execution_context(&self) -> Result<&ExecutionContext, EntityError> {
        if let Some(ctx) = self.execution_context.get() {
            return Ok(ctx);
        }
        let management = self.management()?;
        Ok(self
            .execution_context
            .get_or_init(|| management.execution_context(&self.id)))
    }

    /// Root application of this entity's tree.
    ///
    /// Resolved at most once: after the first successful resolution the
    /// result is fixed for the entity's lifetime. An entity whose tree has no
    /// application root yet resolves to `None` and may resolve later.
    pub fn application(&self) -> Option<Arc<Entity>> {
        if let Some(app) = self.application.get() {
            return app.upgrade();
        }
        let root = self.root_or_self()?;
        if !root.is_application() {
            return None;
        }
        self.application
            .get_or_init(|| Arc::downgrade(&root))
            .upgrade()
    }

    pub fn application_id(&self) -> Option<EntityId> {
        self.application().map(|app| app.id.clone())
    }

    /// Mark this application deployed; config becomes immutable across its tree.
    ///
    /// Waits for config changes in flight under this application to finish.
    pub fn mark_deployed(&self) {
        let _propagation = self.config.propagation_lock();
        if !self.deployed.swap(true, Ordering::SeqCst) {
            info!(entity_id = %self.id, name = %self.display_name, "Application deployed");
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed.load(Ordering::SeqCst)
    }

    // ── Attributes ────────────────────────────────────────────────────────

    /// Current value of `sensor`, `None` if never set or not decodable as `T`
    pub fn attribute<T: DeserializeOwned>(&self, sensor: &Sensor<T>) -> Option<T> {
        self.attributes
            .get(sensor.name())
            .and_then(|v| sensor.decode(v))
    }

    pub fn attribute_value(&self, name: &str) -> Option<Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> BTreeMap<String, Value> {
        self.attributes.snapshot().into_iter().collect()
    }

    /// Set `sensor` and notify its subscribers. Returns the previous value.
    pub fn set_attribute<T: Serialize>(&self, sensor: &Sensor<T>, value: T) -> Result<Option<Value>, EntityError> {
        let value = serde_json::to_value(value)?;
        Ok(self.set_attribute_value(sensor.name(), value))
    }

    /// Untyped [`Entity::set_attribute`]
    pub fn set_attribute_value(&self, name: &str, value: Value) -> Option<Value> {
        let delivery = self.delivery(name);
        self.attributes.update(name, value.clone(), move |old| {
            let old = old.cloned();
            move || {
                if let Some(deliver) = delivery {
                    deliver(old, value);
                }
            }
        })
    }

    /// Publish a value for `sensor` without retaining it
    pub fn emit<T: Serialize>(&self, sensor: &Sensor<T>, value: T) -> Result<(), EntityError> {
        let value = serde_json::to_value(value)?;
        self.subscriptions()?;
        let delivery = self.delivery(sensor.name());
        self.attributes.publish_only(move || {
            if let Some(deliver) = delivery {
                deliver(None, value);
            }
        });
        Ok(())
    }

    /// Owned publisher for a change of `sensor`, run after the attribute lock is released
    fn delivery(&self, sensor: &str) -> Option<impl FnOnce(Option<Value>, Value) + Send + 'static> {
        let manager = Arc::clone(self.subscriptions().ok()?.manager());
        let id = self.id.clone();
        let sensor = sensor.to_string();
        let owner = self.owner_id();
        let groups = self.group_ids();
        Some(move |old: Option<Value>, value: Value| {
            manager.publish_value(&id, &sensor, old, value, owner.as_deref(), &groups);
        })
    }

    // ── Sensors and effectors ─────────────────────────────────────────────

    /// Add a sensor to this instance only
    pub fn add_sensor<T>(&self, sensor: &Sensor<T>) {
        self.dynamic_sensors
            .lock()
            .insert(sensor.name().to_string(), sensor.descriptor().clone());
    }

    pub fn sensor(&self, name: &str) -> Option<SensorDescriptor> {
        self.dynamic_sensors
            .lock()
            .get(name)
            .cloned()
            .or_else(|| self.entity_type.sensor(name).cloned())
    }

    /// Add an effector to this instance only; shadows a type effector of the same name
    pub fn add_effector<F>(&self, effector: Effector, body: F)
    where
        F: Fn(&EffectorContext<'_>, &Parameters) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let registered = RegisteredEffector::new(effector, body);
        self.dynamic_effectors
            .lock()
            .insert(registered.name().to_string(), registered);
    }

    pub fn effector(&self, name: &str) -> Option<RegisteredEffector> {
        self.dynamic_effectors
            .lock()
            .get(name)
            .cloned()
            .or_else(|| self.entity_type.effector(name).cloned())
    }

    pub fn effectors(&self) -> Vec<Effector> {
        let mut all: BTreeMap<String, Effector> = self
            .entity_type
            .effectors()
            .map(|e| (e.name.clone(), e.clone()))
            .collect();
        for (name, registered) in self.dynamic_effectors.lock().iter() {
            all.insert(name.clone(), registered.effector.as_ref().clone());
        }
        all.into_values().collect()
    }

    /// Invoke an effector, always as a newly submitted task.
    ///
    /// Inside an effector body use `EffectorContext::invoke` or
    /// [`Entity::invoke_from`] so a call on the same entity runs inline.
    pub fn invoke(self: &Arc<Self>, effector: &str, arguments: Parameters) -> Result<Task, EntityError> {
        effector::submit(self, effector, arguments)
    }

    /// Invoke an effector from within `current`, running inline when
    /// `current` already executes on behalf of this entity
    pub fn invoke_from(
        self: &Arc<Self>,
        current: Option<&TaskContext>,
        effector: &str,
        arguments: Parameters,
    ) -> Result<Invocation, EntityError> {
        effector::invoke(self, effector, arguments, current)
    }

    // ── Config ────────────────────────────────────────────────────────────

    /// Effective value of `key`, own before inherited before the key default.
    ///
    /// A task-valued config blocks the caller until the task ends and yields
    /// its result or failure.
    pub fn config<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Result<Option<T>, EntityError> {
        let raw = match self.config.effective(key.name()) {
            Some(value) => Some(resolve(value)?),
            None => key.default_value().cloned(),
        };
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Untyped effective value, resolving task-valued config
    pub fn config_value(&self, name: &str) -> Result<Option<Value>, EntityError> {
        match self.config.effective(name) {
            Some(value) => Ok(Some(resolve(value)?)),
            None => Ok(self
                .entity_type
                .config_key(name)
                .and_then(|k| k.default.clone())),
        }
    }

    /// Replace the own value of `key`. Returns the previous own value.
    pub fn set_config<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<Option<ConfigValue>, EntityError> {
        let value = serde_json::to_value(value)?;
        self.set_config_value(key.name(), ConfigValue::Value(value))
    }

    /// Set `key` to be resolved by `task`, submitting it if unsubmitted
    pub fn set_config_task<T>(&self, key: &ConfigKey<T>, task: Task) -> Result<Option<ConfigValue>, EntityError> {
        self.set_config_value(key.name(), ConfigValue::Task(task))
    }

    /// Fails with `ConfigImmutable` once the owning application is deployed.
    /// Descendants see the new value before this returns.
    pub fn set_config_value(&self, name: &str, value: ConfigValue) -> Result<Option<ConfigValue>, EntityError> {
        self.ensure_config_mutable(name)?;

        let value = match value {
            ConfigValue::Task(task) if !task.is_submitted() => {
                ConfigValue::Task(self.execution_context()?.submit(task))
            }
            other => other,
        };

        let app = self.application();
        let _deployment = app.as_ref().map(|app| app.config.propagation_lock());
        let _propagation = self.config.propagation_lock();
        self.ensure_config_mutable(name)?;
        let old = self.config.set_own(name, value);
        for child in self.children() {
            child.refresh_inherited_config();
        }
        Ok(old)
    }

    /// Drop the own value of `name`, falling back to the inherited one
    pub fn remove_config(&self, name: &str) -> Result<Option<ConfigValue>, EntityError> {
        self.ensure_config_mutable(name)?;
        let app = self.application();
        let _deployment = app.as_ref().map(|app| app.config.propagation_lock());
        let _propagation = self.config.propagation_lock();
        self.ensure_config_mutable(name)?;
        let old = self.config.remove_own(name);
        for child in self.children() {
            child.refresh_inherited_config();
        }
        Ok(old)
    }

    fn ensure_config_mutable(&self, name: &str) -> Result<(), EntityError> {
        match self.application().filter(|app| app.is_deployed()) {
            Some(app) => {
                warn!(entity_id = %self.id, key = %name, "Config change refused, application deployed");
                Err(EntityError::ConfigImmutable {
                    entity: self.id.clone(),
                    key: name.to_string(),
                    application: app.id.clone(),
                })
            }
            None => Ok(()),
        }
    }

    /// Recompute inherited config from the owner's full effective config
    /// (cleared without an owner), then recurse into every child.
    pub fn refresh_inherited_config(&self) {
        let _propagation = self.config.propagation_lock();
        let inherited = self
            .owner()
            .map(|owner| owner.config.all())
            .unwrap_or_default();
        self.config.replace_inherited(inherited);
        for child in self.children() {
            child.refresh_inherited_config();
        }
    }

    /// Immutable merge of inherited then own config
    pub fn all_config(&self) -> BTreeMap<String, ConfigValue> {
        self.config.all()
    }

    pub fn own_config(&self) -> BTreeMap<String, ConfigValue> {
        self.config.own_snapshot()
    }

    pub fn inherited_config(&self) -> BTreeMap<String, ConfigValue> {
        self.config.inherited_snapshot()
    }

    /// Apply construction-time config without deployment checks
    pub(crate) fn init_config(&self, config: &[(String, ConfigValue)]) -> Result<(), EntityError> {
        for (name, value) in config {
            let value = match value {
                ConfigValue::Task(task) if !task.is_submitted() => {
                    ConfigValue::Task(self.execution_context()?.submit(task.clone()))
                }
                other => other.clone(),
            };
            self.config.set_own(name, value);
        }
        Ok(())
    }

    // ── Locations ─────────────────────────────────────────────────────────

    pub fn locations(&self) -> Vec<Location> {
        self.locations.lock().clone()
    }

    /// Append locations not already present
    pub fn add_locations(&self, locations: impl IntoIterator<Item = Location>) {
        let mut current = self.locations.lock();
        for location in locations {
            if !current.contains(&location) {
                current.push(location);
            }
        }
    }

    pub fn remove_location(&self, name: &str) -> bool {
        let mut current = self.locations.lock();
        let before = current.len();
        current.retain(|l| l.name != name);
        current.len() != before
    }

    // ── Policies ──────────────────────────────────────────────────────────

    pub fn attach_policy(self: &Arc<Self>, policy: Arc<dyn Policy>) -> Result<Arc<PolicyHook>, EntityError> {
        self.ensure_live()?;
        let hook = PolicyHook::attach(self, policy)?;
        self.policies.lock().push(Arc::clone(&hook));
        Ok(hook)
    }

    /// Detach by hook id, cancelling the policy's subscriptions
    pub fn detach_policy(&self, hook_id: &str) -> bool {
        let hook = {
            let mut policies = self.policies.lock();
            let index = policies.iter().position(|h| h.id() == hook_id);
            index.map(|i| policies.remove(i))
        };
        match hook {
            Some(hook) => {
                hook.detach();
                true
            }
            None => false,
        }
    }

    pub fn policies(&self) -> Vec<Arc<PolicyHook>> {
        self.policies.lock().clone()
    }

    pub(super) fn take_policies(&self) -> Vec<Arc<PolicyHook>> {
        std::mem::take(&mut *self.policies.lock())
    }
}

fn resolve(value: ConfigValue) -> Result<Value, EntityError> {
    match value {
        ConfigValue::Value(v) => Ok(v),
        ConfigValue::Task(task) => Ok(task.get()?),
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("type", &self.entity_type.name())
            .finish()
    }
}
