// Sensors, attribute storage and sensor change events

mod attributes;
mod value_type;

pub use attributes::AttributeMap;
pub use value_type::ValueType;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

use crate::entity::EntityId;


/// Untyped sensor descriptor, as stored in an entity type's sensor table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub name: String,
    pub description: String,
    pub value_type: ValueType,
}

/// Typed key identifying an observable attribute of an entity.
///
/// Values are held as JSON; `T` fixes the Rust type callers read and write.
pub struct Sensor<T> {
    descriptor: SensorDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Sensor<T> {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            descriptor: SensorDescriptor {
                name: name.into(),
                description: String::new(),
                value_type,
            },
            _marker: PhantomData,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn value_type(&self) -> ValueType {
        self.descriptor.value_type
    }

    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }
}

impl<T: DeserializeOwned> Sensor<T> {
    /// Decode a stored value; `None` when it does not fit `T`.
    pub fn decode(&self, value: Value) -> Option<T> {
        serde_json::from_value(value).ok()
    }
}

impl<T> Clone for Sensor<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Sensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.descriptor.name)
            .field("value_type", &self.descriptor.value_type)
            .finish()
    }
}

/// Sensor change notification delivered to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensorEvent {
    pub producer: EntityId,
    pub sensor: String,
    /// Previous retained value; always `None` for emitted (event-only) values
    pub old_value: Option<Value>,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}
