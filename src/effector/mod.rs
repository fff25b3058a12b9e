// Effector descriptors, argument preparation and invocation

mod invoker;

pub use invoker::{EffectorContext, Invocation};
pub(crate) use invoker::{invoke, submit};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::entity::EntityError;
use crate::sensor::ValueType;

#[cfg(test)]
mod tests;

/// Flat set of named effector arguments
pub type Parameters = Map<String, Value>;

/// Operation run by an effector invocation
pub type EffectorBody =
    Arc<dyn Fn(&EffectorContext<'_>, &Parameters) -> anyhow::Result<Value> + Send + Sync>;

/// Declared effector parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterType {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterType {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            description: String::new(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Typed operation descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effector {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Vec<ParameterType>,
    pub return_type: ValueType,
}

impl Effector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            return_type: ValueType::Any,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameter(mut self, parameter: ParameterType) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn returns(mut self, return_type: ValueType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Validate and coerce `arguments` against the declared parameter list.
    ///
    /// Unknown names and values that cannot be coerced to the declared type
    /// are rejected. An omitted parameter takes its default, or null when it
    /// has none.
    pub fn prepare_arguments(&self, mut arguments: Parameters) -> Result<Parameters, EntityError> {
        if let Some(unknown) = arguments
            .keys()
            .find(|k| !self.parameters.iter().any(|p| &p.name == *k))
        {
            return Err(EntityError::InvalidArguments {
                effector: self.name.clone(),
                reason: format!("unknown parameter '{}'", unknown),
            });
        }

        let mut prepared = Parameters::new();
        for param in &self.parameters {
            let raw = arguments
                .remove(&param.name)
                .or_else(|| param.default.clone())
                .unwrap_or(Value::Null);
            let coerced = param.value_type.coerce(raw.clone()).ok_or_else(|| {
                EntityError::InvalidArguments {
                    effector: self.name.clone(),
                    reason: format!(
                        "parameter '{}' expects {:?}, got {}",
                        param.name, param.value_type, raw
                    ),
                }
            })?;
            prepared.insert(param.name.clone(), coerced);
        }
        Ok(prepared)
    }
}

/// Effector descriptor paired with its body, as held in an effector registry
#[derive(Clone)]
pub struct RegisteredEffector {
    pub effector: Arc<Effector>,
    pub body: EffectorBody,
}

impl RegisteredEffector {
    pub fn new<F>(effector: Effector, body: F) -> Self
    where
        F: Fn(&EffectorContext<'_>, &Parameters) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            effector: Arc::new(effector),
            body: Arc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.effector.name
    }

    /// Run the body against already-prepared arguments, checking the result
    /// against the declared return type.
    pub(crate) fn call(&self, ctx: &EffectorContext<'_>, arguments: &Parameters) -> anyhow::Result<Value> {
        let result = (self.body)(ctx, arguments)?;
        self.effector
            .return_type
            .coerce(result.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "effector '{}' returned {} but declares {:?}",
                    self.effector.name,
                    result,
                    self.effector.return_type
                )
            })
    }
}

impl fmt::Debug for RegisteredEffector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredEffector")
            .field("effector", &self.effector)
            .finish()
    }
}
