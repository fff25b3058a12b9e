// Entity object model: identity, ownership tree, groups, attributes and config

mod config;
mod entity;
mod entity_type;
mod error;
mod tree;

pub use config::{ConfigKey, ConfigKeyDescriptor, ConfigStore, ConfigValue};
pub use entity::{Entity, EntitySpec, Location};
pub use entity_type::{EntityType, EntityTypeBuilder};
pub use error::EntityError;

/// Opaque unique entity identifier
pub type EntityId = String;
