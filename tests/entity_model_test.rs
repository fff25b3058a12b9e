// Integration tests for the entity model: ownership, config inheritance,
// attribute notification and effector reentrancy, driven through the public API.

use entity_runtime::config::{ExecutorConfig, RuntimeConfig};
use entity_runtime::effector::{Effector, ParameterType, Parameters};
use entity_runtime::entity::{ConfigKey, Entity, EntityError, EntitySpec, EntityType};
use entity_runtime::management::ManagementContext;
use entity_runtime::sensor::{Sensor, SensorEvent, ValueType};
use entity_runtime::task::TaskTag;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn management() -> Arc<ManagementContext> {
    let mut config = RuntimeConfig::default();
    config.executor = ExecutorConfig {
        worker_threads: 2,
        max_blocking_threads: 8,
        thread_name: "it-task".to_string(),
    };
    ManagementContext::new(config).unwrap()
}

fn timeout() -> ConfigKey<i64> {
    ConfigKey::new("timeout", ValueType::Integer)
}

fn load() -> Sensor<i64> {
    Sensor::new("load", ValueType::Integer)
}

/// Plain operation also exposed as an effector
fn weigh(items: i64, factor: i64) -> i64 {
    items * factor + 1
}

fn worker_type(trace: Arc<Mutex<Vec<(String, String)>>>) -> Arc<EntityType> {
    let f1_trace = Arc::clone(&trace);
    EntityType::builder("worker")
        .sensor(&load())
        .config_key(&timeout())
        .effector(
            Effector::new("weigh")
                .parameter(ParameterType::new("items", ValueType::Integer))
                .parameter(ParameterType::new("factor", ValueType::Integer).with_default(2))
                .returns(ValueType::Integer),
            |_, args| {
                let items = args.get("items").and_then(Value::as_i64).unwrap_or(0);
                let factor = args.get("factor").and_then(Value::as_i64).unwrap_or(1);
                Ok(json!(weigh(items, factor)))
            },
        )
        .effector(Effector::new("f1"), move |ctx, _| {
            f1_trace
                .lock()
                .push(("f1".to_string(), ctx.task().task().id().to_string()));
            let me = Arc::clone(ctx.entity());
            let nested = ctx.invoke(&me, "f2", Parameters::new())?;
            anyhow::ensure!(nested.task().is_none(), "f2 spawned a task");
            nested.get().map_err(anyhow::Error::from)
        })
        .effector(Effector::new("f2"), move |ctx, _| {
            trace
                .lock()
                .push(("f2".to_string(), ctx.task().task().id().to_string()));
            Ok(json!("f2 done"))
        })
        .build()
}

struct World {
    mgmt: Arc<ManagementContext>,
    app: Arc<Entity>,
    child: Arc<Entity>,
    trace: Arc<Mutex<Vec<(String, String)>>>,
}

fn world() -> World {
    let mgmt = management();
    let trace = Arc::new(Mutex::new(Vec::new()));
    let kind = worker_type(Arc::clone(&trace));
    let app = mgmt
        .create_entity(EntitySpec::application(Arc::clone(&kind)).display_name("App"))
        .unwrap();
    let child = mgmt
        .create_entity(EntitySpec::new(kind).display_name("Child").owner(&app))
        .unwrap();
    World { mgmt, app, child, trace }
}

fn plain(world: &World) -> Arc<Entity> {
    world
        .mgmt
        .create_entity(EntitySpec::new(EntityType::builder("plain").build()))
        .unwrap()
}

fn args(value: Value) -> Parameters {
    match value {
        Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

// ── Ownership ─────────────────────────────────────────────────────────────────

#[test]
fn test_reverse_ownership_is_a_cycle_and_changes_nothing() {
    let w = world();
    let a = plain(&w);
    let b = plain(&w);

    a.add_owned_child(&b).unwrap();
    let result = b.add_owned_child(&a);

    assert!(matches!(result, Err(EntityError::CycleDetected { .. })));
    assert_eq!(a.children().len(), 1);
    assert!(a.owner().is_none());
    assert!(b.children().is_empty());
    assert_eq!(b.owner_id().as_deref(), Some(a.id()));
}

#[test]
fn test_set_owner_twice() {
    let w = world();
    let e = plain(&w);
    let other = plain(&w);

    e.set_owner(&w.app).unwrap();
    e.set_owner(&w.app).unwrap();
    assert!(matches!(
        e.set_owner(&other),
        Err(EntityError::OwnershipConflict { .. })
    ));
    assert_eq!(e.owner_id().as_deref(), Some(w.app.id()));
}

// ── Config ────────────────────────────────────────────────────────────────────

#[test]
fn test_config_inheritance_scenario() {
    let w = world();

    w.app.set_config(&timeout(), 30).unwrap();
    assert_eq!(w.child.config(&timeout()).unwrap(), Some(30));

    w.child.set_config(&timeout(), 5).unwrap();
    assert_eq!(w.child.config(&timeout()).unwrap(), Some(5));
    assert_eq!(w.app.config(&timeout()).unwrap(), Some(30));
}

#[test]
fn test_owner_config_reaches_every_descendant_without_override() {
    let w = world();
    let mid = plain(&w);
    w.child.add_owned_child(&mid).unwrap();
    let leaves: Vec<_> = (0..5)
        .map(|_| {
            let leaf = plain(&w);
            mid.add_owned_child(&leaf).unwrap();
            leaf
        })
        .collect();
    leaves[0].set_config(&timeout(), 99).unwrap();

    w.app.set_config(&timeout(), 12).unwrap();

    assert_eq!(leaves[0].config(&timeout()).unwrap(), Some(99));
    for leaf in &leaves[1..] {
        assert_eq!(leaf.config(&timeout()).unwrap(), Some(12));
    }
}

#[test]
fn test_deployed_application_rejects_config() {
    let w = world();
    w.app.mark_deployed();

    let x: ConfigKey<i64> = ConfigKey::new("x", ValueType::Integer);
    match w.child.set_config(&x, 1) {
        Err(EntityError::ConfigImmutable { application, .. }) => assert_eq!(application, w.app.id()),
        other => panic!("expected ConfigImmutable, got {:?}", other),
    }
    assert_eq!(w.child.config(&x).unwrap(), None);
}

// ── Attributes ────────────────────────────────────────────────────────────────

#[test]
fn test_single_update_gives_exactly_one_notification() {
    let w = world();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    w.app
        .subscriptions()
        .unwrap()
        .subscribe(&w.child, &load(), move |event: &SensorEvent| {
            sink.lock().push(event.value.clone())
        });

    w.child.set_attribute(&load(), 42).unwrap();

    // Delivered before set_attribute returned
    assert_eq!(*seen.lock(), vec![json!(42)]);
}

#[test]
fn test_concurrent_updates_keep_per_sensor_order() {
    let w = world();
    let producers: Vec<_> = (0..4).map(|_| plain(&w)).collect();
    let seen: Arc<Mutex<Vec<(String, i64)>>> = Arc::new(Mutex::new(Vec::new()));
    for p in &producers {
        let sink = Arc::clone(&seen);
        w.app
            .subscriptions()
            .unwrap()
            .subscribe(p, &load(), move |event: &SensorEvent| {
                if let Some(v) = event.value.as_i64() {
                    sink.lock().push((event.producer.clone(), v));
                }
            });
    }

    let handles: Vec<_> = producers
        .iter()
        .map(|p| {
            let p = Arc::clone(p);
            thread::spawn(move || {
                for i in 0..200 {
                    p.set_attribute(&load(), i).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), 800);
    for p in &producers {
        let values: Vec<i64> = seen
            .iter()
            .filter(|(id, _)| id == p.id())
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(values, (0..200).collect::<Vec<_>>());
    }
}

// ── Effectors ─────────────────────────────────────────────────────────────────

#[test]
fn test_effector_task_matches_direct_call() {
    let w = world();
    let task = w.child.invoke("weigh", args(json!({"items": 7, "factor": 3}))).unwrap();
    assert_eq!(task.get().unwrap(), json!(weigh(7, 3)));

    let task = w.child.invoke("weigh", args(json!({"items": "4"}))).unwrap();
    assert_eq!(task.get().unwrap(), json!(weigh(4, 2)));
}

#[test]
fn test_self_invocation_runs_inline() {
    let w = world();
    let before = w.mgmt.executor().submitted_count();

    let task = w.app.invoke("f1", Parameters::new()).unwrap();
    assert_eq!(task.get().unwrap(), json!("f2 done"));

    assert_eq!(w.mgmt.executor().submitted_count(), before + 1);
    let trace = w.trace.lock();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].0, "f1");
    assert_eq!(trace[1].0, "f2");
    assert_eq!(trace[0].1, trace[1].1);
    assert!(task.has_tag(&TaskTag::Entity(w.app.id().to_string())));
}

#[test]
fn test_invalid_arguments_fail_before_submission() {
    let w = world();
    let before = w.mgmt.executor().submitted_count();

    let result = w.child.invoke("weigh", args(json!({"items": [1, 2]})));
    assert!(matches!(result, Err(EntityError::InvalidArguments { .. })));
    assert_eq!(w.mgmt.executor().submitted_count(), before);
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[test]
fn test_destroy_application_unregisters_tree() {
    let w = world();
    assert_eq!(w.mgmt.count(), 2);

    w.app.destroy();

    assert_eq!(w.mgmt.count(), 0);
    assert!(w.mgmt.applications().is_empty());
    assert!(w.child.is_destroyed());
}
