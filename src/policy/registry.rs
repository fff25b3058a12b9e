use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use super::Policy;
use crate::entity::EntityError;

/// Builds a policy instance from JSON parameters
pub type PolicyFactory = Arc<dyn Fn(&Value) -> anyhow::Result<Arc<dyn Policy>> + Send + Sync>;

/// Named policy types available for attachment by name
pub struct PolicyRegistry {
    factories: DashMap<String, PolicyFactory>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Register (or replace) the factory for `type_name`
    pub fn register<F>(&self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> anyhow::Result<Arc<dyn Policy>> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn create(&self, type_name: &str, params: &Value) -> Result<Arc<dyn Policy>, EntityError> {
        // Clone out so the factory runs without holding the shard lock
        let factory = self
            .factories
            .get(type_name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| EntityError::PolicyTypeNotFound(type_name.to_string()))?;
        factory(params).map_err(|e| EntityError::PolicyFailed {
            policy: type_name.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
