use super::*;
use crate::config::{ExecutorConfig, RuntimeConfig};
use crate::entity::{Entity, EntitySpec, EntityType};
use crate::management::ManagementContext;
use crate::task::{TaskError, TaskState, TaskTag};
use parking_lot::Mutex;
use serde_json::json;

fn management() -> Arc<ManagementContext> {
    let mut config = RuntimeConfig::default();
    config.executor = ExecutorConfig {
        worker_threads: 1,
        max_blocking_threads: 4,
        thread_name: "effector-test".to_string(),
    };
    ManagementContext::new(config).unwrap()
}

fn args(value: Value) -> Parameters {
    match value {
        Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

fn resize() -> Effector {
    Effector::new("resize")
        .parameter(ParameterType::new("size", ValueType::Integer))
        .parameter(ParameterType::new("zone", ValueType::String).with_default("eu-1"))
        .parameter(ParameterType::new("dry_run", ValueType::Boolean))
}

#[test]
fn test_prepare_arguments_applies_defaults_and_coercion() {
    let prepared = resize()
        .prepare_arguments(args(json!({"size": "4", "dry_run": "true"})))
        .unwrap();

    assert_eq!(prepared.get("size"), Some(&json!(4)));
    assert_eq!(prepared.get("zone"), Some(&json!("eu-1")));
    assert_eq!(prepared.get("dry_run"), Some(&json!(true)));
}

#[test]
fn test_prepare_arguments_missing_without_default_is_null() {
    let prepared = resize().prepare_arguments(Parameters::new()).unwrap();
    assert_eq!(prepared.get("size"), Some(&Value::Null));
    assert_eq!(prepared.get("dry_run"), Some(&Value::Null));
}

#[test]
fn test_prepare_arguments_rejects_unknown_name() {
    let err = resize()
        .prepare_arguments(args(json!({"sise": 4})))
        .unwrap_err();
    match err {
        EntityError::InvalidArguments { effector, reason } => {
            assert_eq!(effector, "resize");
            assert!(reason.contains("sise"));
        }
        other => panic!("expected InvalidArguments, got {:?}", other),
    }
}

#[test]
fn test_prepare_arguments_rejects_uncoercible_value() {
    let err = resize()
        .prepare_arguments(args(json!({"size": "large"})))
        .unwrap_err();
    assert!(matches!(err, EntityError::InvalidArguments { .. }));
}

fn counter_type(calls: Arc<Mutex<Vec<String>>>) -> Arc<EntityType> {
    let inner_calls = Arc::clone(&calls);
    EntityType::builder("counter")
        .effector(
            Effector::new("inner")
                .parameter(ParameterType::new("n", ValueType::Integer))
                .returns(ValueType::Integer),
            move |ctx, args| {
                inner_calls.lock().push(ctx.task().task().id().to_string());
                let n = args.get("n").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(n * 2))
            },
        )
        .effector(Effector::new("outer").returns(ValueType::Integer), move |ctx, _| {
            calls.lock().push(ctx.task().task().id().to_string());
            let entity = Arc::clone(ctx.entity());
            let invocation = ctx.invoke(&entity, "inner", args(json!({"n": 21})))?;
            anyhow::ensure!(invocation.is_inline(), "nested call was not inline");
            Ok(invocation.get()?)
        })
        .effector(Effector::new("fail"), |_, _| anyhow::bail!("out of quota"))
        .effector(Effector::new("bad_return").returns(ValueType::Integer), |_, _| {
            Ok(json!("not a number"))
        })
        .build()
}

fn counter(mgmt: &Arc<ManagementContext>) -> (Arc<Entity>, Arc<Mutex<Vec<String>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let entity = mgmt
        .create_entity(EntitySpec::application(counter_type(Arc::clone(&calls))))
        .unwrap();
    (entity, calls)
}

#[test]
fn test_invoke_returns_result_through_task() {
    let mgmt = management();
    let (entity, _) = counter(&mgmt);

    let task = entity.invoke("inner", args(json!({"n": 5}))).unwrap();
    assert_eq!(task.get().unwrap(), json!(10));
    assert_eq!(task.state(), TaskState::Completed);
    assert!(task.has_tag(&TaskTag::Entity(entity.id().to_string())));
    assert!(task.has_tag(&TaskTag::Effector("inner".to_string())));
    assert!(task.display_name().contains("inner"));
}

#[test]
fn test_nested_invocation_on_same_entity_runs_inline() {
    let mgmt = management();
    let (entity, calls) = counter(&mgmt);

    let task = entity.invoke("outer", Parameters::new()).unwrap();
    assert_eq!(task.get().unwrap(), json!(42));

    // One task for both effectors
    assert_eq!(mgmt.executor().submitted_count(), 1);
    let calls = calls.lock();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
    assert_eq!(calls[0], task.id().to_string());
}

#[test]
fn test_invoke_on_other_entity_submits_new_task() {
    let mgmt = management();
    let (first, _) = counter(&mgmt);
    let (second, second_calls) = counter(&mgmt);

    let target = Arc::clone(&second);
    first.add_effector(Effector::new("delegate"), move |ctx, _| {
        let invocation = ctx.invoke(&target, "inner", args(json!({"n": 1})))?;
        anyhow::ensure!(!invocation.is_inline(), "call on another entity ran inline");
        Ok(invocation.get()?)
    });

    let task = first.invoke("delegate", Parameters::new()).unwrap();
    assert_eq!(task.get().unwrap(), json!(2));
    assert_eq!(mgmt.executor().submitted_count(), 2);
    assert_ne!(second_calls.lock()[0], task.id().to_string());
}

#[test]
fn test_entity_invoke_inside_body_always_submits() {
    let mgmt = management();
    let (entity, calls) = counter(&mgmt);

    entity.add_effector(Effector::new("detached"), |ctx, _| {
        // Same entity, but Entity::invoke never runs inline
        let task = ctx.entity().invoke("inner", args(json!({"n": 4})))?;
        anyhow::ensure!(task.id() != ctx.task().task().id(), "reused the calling task");
        Ok(task.get()?)
    });

    let task = entity.invoke("detached", Parameters::new()).unwrap();
    assert_eq!(task.get().unwrap(), json!(8));
    assert_eq!(mgmt.executor().submitted_count(), 2);
    assert_ne!(calls.lock()[0], task.id().to_string());
}

#[test]
fn test_invoke_from_outside_task_matches_direct_invoke() {
    let mgmt = management();
    let (entity, _) = counter(&mgmt);

    let via_task = entity.invoke("inner", args(json!({"n": 3}))).unwrap().get().unwrap();
    let invocation = entity.invoke_from(None, "inner", args(json!({"n": 3}))).unwrap();
    assert!(!invocation.is_inline());
    assert!(invocation.task().is_some());
    assert_eq!(invocation.get().unwrap(), via_task);
}

#[test]
fn test_effector_failure_reaches_waiter() {
    let mgmt = management();
    let (entity, _) = counter(&mgmt);

    let task = entity.invoke("fail", Parameters::new()).unwrap();
    match task.get() {
        Err(TaskError::Failed(cause)) => assert!(cause.to_string().contains("out of quota")),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_return_type_is_enforced() {
    let mgmt = management();
    let (entity, _) = counter(&mgmt);

    let task = entity.invoke("bad_return", Parameters::new()).unwrap();
    assert!(matches!(task.get(), Err(TaskError::Failed(_))));
}

#[test]
fn test_unknown_effector_is_rejected_synchronously() {
    let mgmt = management();
    let (entity, _) = counter(&mgmt);

    assert!(matches!(
        entity.invoke("missing", Parameters::new()),
        Err(EntityError::EffectorNotFound { .. })
    ));
    assert_eq!(mgmt.executor().submitted_count(), 0);
}

#[test]
fn test_invalid_arguments_submit_no_task() {
    let mgmt = management();
    let (entity, _) = counter(&mgmt);

    assert!(matches!(
        entity.invoke("inner", args(json!({"n": "many"}))),
        Err(EntityError::InvalidArguments { .. })
    ));
    assert_eq!(mgmt.executor().submitted_count(), 0);
}

#[test]
fn test_instance_effector_shadows_type_effector() {
    let mgmt = management();
    let (entity, _) = counter(&mgmt);
    entity.add_effector(Effector::new("inner"), |_, _| Ok(json!("patched")));

    let task = entity.invoke("inner", Parameters::new()).unwrap();
    assert_eq!(task.get().unwrap(), json!("patched"));
    assert_eq!(entity.effectors().len(), 4);
}
