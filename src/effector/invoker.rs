use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Parameters, RegisteredEffector};
use crate::entity::{Entity, EntityError};
use crate::task::{Task, TaskContext, TaskError, TaskTag};

/// Result of an effector invocation: either already run inline on the
/// caller's thread, or submitted as a task.
#[derive(Debug, Clone)]
pub enum Invocation {
    Inline(Result<Value, TaskError>),
    Task(Task),
}

impl Invocation {
    /// Result of the invocation, blocking on the task if there is one
    pub fn get(&self) -> Result<Value, TaskError> {
        match self {
            Invocation::Inline(result) => result.clone(),
            Invocation::Task(task) => task.get(),
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            Invocation::Task(task) => Some(task),
            Invocation::Inline(_) => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Invocation::Inline(_))
    }
}

/// What an effector body sees of its invocation
pub struct EffectorContext<'a> {
    entity: Arc<Entity>,
    task: &'a TaskContext,
}

impl<'a> EffectorContext<'a> {
    pub(crate) fn new(entity: Arc<Entity>, task: &'a TaskContext) -> Self {
        Self { entity, task }
    }

    /// Entity the effector runs on
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    pub fn task(&self) -> &TaskContext {
        self.task
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Invoke an effector from inside this one.
    ///
    /// A call on an entity this task already runs for executes inline.
    pub fn invoke(
        &self,
        target: &Arc<Entity>,
        effector: &str,
        arguments: Parameters,
    ) -> Result<Invocation, EntityError> {
        invoke(target, effector, arguments, Some(self.task))
    }
}

fn prepare(
    entity: &Arc<Entity>,
    name: &str,
    arguments: Parameters,
) -> Result<(RegisteredEffector, Parameters), EntityError> {
    let registered = entity
        .effector(name)
        .ok_or_else(|| EntityError::EffectorNotFound {
            entity: entity.id().to_string(),
            effector: name.to_string(),
        })?;
    let arguments = registered.effector.prepare_arguments(arguments)?;
    Ok((registered, arguments))
}

/// Validate arguments, then run the effector inline if `current` already
/// executes on behalf of `entity`, otherwise as a new task tagged with it.
///
/// Argument errors are raised before anything runs or is submitted.
pub(crate) fn invoke(
    entity: &Arc<Entity>,
    name: &str,
    arguments: Parameters,
    current: Option<&TaskContext>,
) -> Result<Invocation, EntityError> {
    let (registered, arguments) = prepare(entity, name, arguments)?;

    let entity_tag = TaskTag::Entity(entity.id().to_string());
    if let Some(ctx) = current.filter(|ctx| ctx.has_tag(&entity_tag)) {
        debug!(
            entity_id = %entity.id(),
            effector = %name,
            task_id = %ctx.task().id(),
            inline = true,
            "Invoking effector"
        );
        let ectx = EffectorContext::new(Arc::clone(entity), ctx);
        let result = registered
            .call(&ectx, &arguments)
            .map_err(|e| TaskError::Failed(Arc::new(e)));
        return Ok(Invocation::Inline(result));
    }

    submit_prepared(entity, name, registered, arguments).map(Invocation::Task)
}

/// Validate arguments and submit the effector as a new task
pub(crate) fn submit(entity: &Arc<Entity>, name: &str, arguments: Parameters) -> Result<Task, EntityError> {
    let (registered, arguments) = prepare(entity, name, arguments)?;
    submit_prepared(entity, name, registered, arguments)
}

fn submit_prepared(
    entity: &Arc<Entity>,
    name: &str,
    registered: RegisteredEffector,
    arguments: Parameters,
) -> Result<Task, EntityError> {
    let execution = entity.execution_context()?;
    let target = Arc::clone(entity);
    let task = Task::new(
        format!("Invoking effector {} on {}", name, entity.display_name()),
        move |task_ctx| {
            let ectx = EffectorContext::new(target, task_ctx);
            registered.call(&ectx, &arguments)
        },
    )
    .with_tag(TaskTag::Effector(name.to_string()));

    let task = execution.submit(task);
    info!(
        entity_id = %entity.id(),
        effector = %name,
        task_id = %task.id(),
        inline = false,
        "Invoking effector"
    );
    Ok(task)
}
