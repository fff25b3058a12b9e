// Management API: the surface an external REST or RPC facade drives

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::effector::{Effector, Parameters};
use crate::entity::{Entity, EntityError};
use crate::management::ManagementContext;
use crate::task::{Task, TaskState, TaskTag};


/// Entity listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(rename = "applicationId", skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
}

impl EntitySummary {
    fn of(entity: &Entity) -> Self {
        Self {
            id: entity.id().to_string(),
            name: entity.display_name().to_string(),
            entity_type: entity.entity_type().name().to_string(),
            owner: entity.owner_id(),
            application_id: entity.application_id(),
        }
    }
}

/// Serializable view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub name: String,
    pub state: TaskState,
    #[serde(rename = "submittedAt")]
    pub created_at: String,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id().to_string(),
            name: task.display_name().to_string(),
            state: task.state(),
            created_at: task.created_at().to_rfc3339(),
        }
    }
}

/// Outcome of an effector invocation through the API
#[derive(Debug, Clone)]
pub enum EffectorResponse {
    /// The effector finished within the caller's wait bound
    Completed(Value),
    /// Still running; poll or block on the task
    Pending(Task),
}

/// Application-scoped operations over a [`ManagementContext`]
#[derive(Clone)]
pub struct ManagementApi {
    mgmt: Arc<ManagementContext>,
}

impl ManagementApi {
    pub fn new(mgmt: Arc<ManagementContext>) -> Self {
        Self { mgmt }
    }

    pub fn management(&self) -> &Arc<ManagementContext> {
        &self.mgmt
    }

    /// All application roots, sorted by id
    pub fn applications(&self) -> Vec<EntitySummary> {
        let mut apps: Vec<EntitySummary> = self
            .mgmt
            .applications()
            .iter()
            .map(|app| EntitySummary::of(app))
            .collect();
        apps.sort_by(|a, b| a.id.cmp(&b.id));
        apps
    }

    /// Every entity reachable from the application root, breadth-first
    pub fn entities(&self, app_id: &str) -> Result<Vec<EntitySummary>, EntityError> {
        let app = self.application(app_id)?;
        Ok(app
            .descendants_and_self()
            .iter()
            .map(|e| EntitySummary::of(e))
            .collect())
    }

    /// Resolve an entity within an application
    pub fn entity(&self, app_id: &str, entity_id: &str) -> Result<Arc<Entity>, EntityError> {
        let app = self.application(app_id)?;
        let entity = self
            .mgmt
            .entity(entity_id)
            .ok_or_else(|| EntityError::EntityNotFound(entity_id.to_string()))?;
        if entity.application_id().as_deref() != Some(app.id()) {
            return Err(EntityError::EntityNotFound(entity_id.to_string()));
        }
        Ok(entity)
    }

    /// Current sensor value, `None` if never set
    pub fn sensor(&self, app_id: &str, entity_id: &str, sensor: &str) -> Result<Option<Value>, EntityError> {
        Ok(self.entity(app_id, entity_id)?.attribute_value(sensor))
    }

    pub fn sensors(&self, app_id: &str, entity_id: &str) -> Result<BTreeMap<String, Value>, EntityError> {
        Ok(self.entity(app_id, entity_id)?.attributes())
    }

    pub fn effectors(&self, app_id: &str, entity_id: &str) -> Result<Vec<Effector>, EntityError> {
        Ok(self.entity(app_id, entity_id)?.effectors())
    }

    /// Invoke an effector by name.
    ///
    /// With a `wait` bound the call blocks up to that long and returns the
    /// result if the task ended; a task failure is returned as an error.
    /// Without one the pending task is returned immediately.
    pub fn invoke(
        &self,
        app_id: &str,
        entity_id: &str,
        effector: &str,
        arguments: Parameters,
        wait: Option<Duration>,
    ) -> Result<EffectorResponse, EntityError> {
        let entity = self.entity(app_id, entity_id)?;
        let task = entity.invoke(effector, arguments)?;
        let Some(wait) = wait else {
            return Ok(EffectorResponse::Pending(task));
        };
        match task.wait_timeout(wait) {
            Some(result) => Ok(EffectorResponse::Completed(result?)),
            None => Ok(EffectorResponse::Pending(task)),
        }
    }

    /// Attach a registered policy type. Returns the hook id.
    pub fn attach_policy(
        &self,
        app_id: &str,
        entity_id: &str,
        policy_type: &str,
        params: &Value,
    ) -> Result<String, EntityError> {
        let entity = self.entity(app_id, entity_id)?;
        let policy = self.mgmt.policy_types().create(policy_type, params)?;
        let hook = entity.attach_policy(policy)?;
        info!(
            entity_id = %entity_id,
            policy_type = %policy_type,
            policy_id = %hook.id(),
            "Policy attached by type"
        );
        Ok(hook.id().to_string())
    }

    pub fn detach_policy(&self, app_id: &str, entity_id: &str, hook_id: &str) -> Result<bool, EntityError> {
        Ok(self.entity(app_id, entity_id)?.detach_policy(hook_id))
    }

    /// Whether the application is deployed (config is then immutable)
    pub fn is_deployed(&self, app_id: &str) -> Result<bool, EntityError> {
        Ok(self.application(app_id)?.is_deployed())
    }

    /// Tasks still running for an entity
    pub fn active_tasks(&self, app_id: &str, entity_id: &str) -> Result<Vec<TaskSummary>, EntityError> {
        let entity = self.entity(app_id, entity_id)?;
        let tag = TaskTag::Entity(entity.id().to_string());
        let mut tasks: Vec<TaskSummary> = self
            .mgmt
            .executor()
            .tasks_with_tag(&tag)
            .iter()
            .map(TaskSummary::from)
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    fn application(&self, app_id: &str) -> Result<Arc<Entity>, EntityError> {
        self.mgmt
            .entity(app_id)
            .filter(|e| e.is_application())
            .ok_or_else(|| EntityError::EntityNotFound(app_id.to_string()))
    }
}
