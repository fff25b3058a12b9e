use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use crate::sensor::ValueType;
use crate::task::Task;

/// Untyped config key descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigKeyDescriptor {
    pub name: String,
    pub description: String,
    pub value_type: ValueType,
    pub default: Option<Value>,
}

/// Typed configuration key with an optional default
pub struct ConfigKey<T> {
    descriptor: ConfigKeyDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ConfigKey<T> {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            descriptor: ConfigKeyDescriptor {
                name: name.into(),
                description: String::new(),
                value_type,
                default: None,
            },
            _marker: PhantomData,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.descriptor.default = Some(default.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.descriptor.default.as_ref()
    }

    pub fn descriptor(&self) -> &ConfigKeyDescriptor {
        &self.descriptor
    }
}

impl<T> Clone for ConfigKey<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ConfigKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigKey")
            .field("name", &self.descriptor.name)
            .field("default", &self.descriptor.default)
            .finish()
    }
}

/// A config value: either plain, or deferred until a task produces it
#[derive(Debug, Clone)]
pub enum ConfigValue {
    Value(Value),
    Task(Task),
}

impl ConfigValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ConfigValue::Value(v) => Some(v),
            ConfigValue::Task(_) => None,
        }
    }
}

impl PartialEq for ConfigValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConfigValue::Value(a), ConfigValue::Value(b)) => a == b,
            (ConfigValue::Task(a), ConfigValue::Task(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for ConfigValue {
    fn from(v: Value) -> Self {
        ConfigValue::Value(v)
    }
}

#[derive(Default)]
struct ConfigMaps {
    own: BTreeMap<String, ConfigValue>,
    inherited: BTreeMap<String, ConfigValue>,
}

/// Per-entity own and inherited config maps.
///
/// `propagation` serializes an entity's config change together with the
/// refresh of its subtree. It is always taken ancestor before descendant.
#[derive(Default)]
pub struct ConfigStore {
    maps: RwLock<ConfigMaps>,
    propagation: ReentrantMutex<()>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn propagation_lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.propagation.lock()
    }

    /// Own value if present, else the inherited one
    pub fn effective(&self, name: &str) -> Option<ConfigValue> {
        let maps = self.maps.read();
        maps.own
            .get(name)
            .or_else(|| maps.inherited.get(name))
            .cloned()
    }

    pub fn own(&self, name: &str) -> Option<ConfigValue> {
        self.maps.read().own.get(name).cloned()
    }

    pub fn is_own(&self, name: &str) -> bool {
        self.maps.read().own.contains_key(name)
    }

    pub(crate) fn set_own(&self, name: &str, value: ConfigValue) -> Option<ConfigValue> {
        self.maps.write().own.insert(name.to_string(), value)
    }

    pub(crate) fn remove_own(&self, name: &str) -> Option<ConfigValue> {
        self.maps.write().own.remove(name)
    }

    pub(crate) fn replace_inherited(&self, inherited: BTreeMap<String, ConfigValue>) {
        self.maps.write().inherited = inherited;
    }

    /// Inherited config merged with own config, own winning
    pub fn all(&self) -> BTreeMap<String, ConfigValue> {
        let maps = self.maps.read();
        let mut all = maps.inherited.clone();
        all.extend(maps.own.iter().map(|(k, v)| (k.clone(), v.clone())));
        all
    }

    pub fn own_snapshot(&self) -> BTreeMap<String, ConfigValue> {
        self.maps.read().own.clone()
    }

    pub fn inherited_snapshot(&self) -> BTreeMap<String, ConfigValue> {
        self.maps.read().inherited.clone()
    }
}
