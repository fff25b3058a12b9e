use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::config::{ConfigKey, ConfigKeyDescriptor};
use crate::effector::{Effector, EffectorContext, Parameters, RegisteredEffector};
use crate::sensor::{Sensor, SensorDescriptor};

/// Declared shape of a kind of entity: its sensors, config keys and effectors.
///
/// Fixed once built; every entity of the type shares it.
#[derive(Debug, Default)]
pub struct EntityType {
    name: String,
    sensors: BTreeMap<String, SensorDescriptor>,
    config_keys: BTreeMap<String, ConfigKeyDescriptor>,
    effectors: BTreeMap<String, RegisteredEffector>,
}

impl EntityType {
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            inner: EntityType {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorDescriptor> {
        self.sensors.get(name)
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.sensors.values()
    }

    pub fn config_key(&self, name: &str) -> Option<&ConfigKeyDescriptor> {
        self.config_keys.get(name)
    }

    pub fn config_keys(&self) -> impl Iterator<Item = &ConfigKeyDescriptor> {
        self.config_keys.values()
    }

    pub fn effector(&self, name: &str) -> Option<&RegisteredEffector> {
        self.effectors.get(name)
    }

    pub fn effectors(&self) -> impl Iterator<Item = &Effector> {
        self.effectors.values().map(|e| e.effector.as_ref())
    }
}

pub struct EntityTypeBuilder {
    inner: EntityType,
}

impl EntityTypeBuilder {
    pub fn sensor<T>(mut self, sensor: &Sensor<T>) -> Self {
        self.inner
            .sensors
            .insert(sensor.name().to_string(), sensor.descriptor().clone());
        self
    }

    pub fn config_key<T>(mut self, key: &ConfigKey<T>) -> Self {
        self.inner
            .config_keys
            .insert(key.name().to_string(), key.descriptor().clone());
        self
    }

    pub fn effector<F>(mut self, effector: Effector, body: F) -> Self
    where
        F: Fn(&EffectorContext<'_>, &Parameters) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let registered = RegisteredEffector::new(effector, body);
        self.inner
            .effectors
            .insert(registered.name().to_string(), registered);
        self
    }

    pub fn build(self) -> Arc<EntityType> {
        Arc::new(self.inner)
    }
}
