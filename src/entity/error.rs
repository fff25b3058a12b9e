use super::EntityId;
use crate::task::TaskError;

/// Errors raised synchronously by entity operations.
///
/// Every operation returning one of these has left the ownership tree,
/// attributes and config unchanged.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("cycle detected: {entity} cannot be owned by {candidate}")]
    CycleDetected { entity: EntityId, candidate: EntityId },

    #[error("entity {entity} is already owned by {current}; cannot set owner to {candidate}")]
    OwnershipConflict {
        entity: EntityId,
        current: EntityId,
        candidate: EntityId,
    },

    #[error("config '{key}' on entity {entity} is immutable: application {application} is deployed")]
    ConfigImmutable {
        entity: EntityId,
        key: String,
        application: EntityId,
    },

    #[error("invalid arguments for effector '{effector}': {reason}")]
    InvalidArguments { effector: String, reason: String },

    #[error("effector '{effector}' not found on entity {entity}")]
    EffectorNotFound { entity: EntityId, effector: String },

    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("entity {0} has been destroyed")]
    EntityDestroyed(EntityId),

    #[error("entity {0} is not managed")]
    NotManaged(EntityId),

    #[error("policy type '{0}' is not registered")]
    PolicyTypeNotFound(String),

    #[error("policy '{policy}' failed: {reason}")]
    PolicyFailed { policy: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Task(#[from] TaskError),
}
