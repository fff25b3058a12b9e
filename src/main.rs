use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use entity_runtime::config::{load_config, RuntimeConfig};
use entity_runtime::effector::{Effector, ParameterType, Parameters};
use entity_runtime::entity::{ConfigKey, EntitySpec, EntityType};
use entity_runtime::management::ManagementContext;
use entity_runtime::sensor::{Sensor, SensorEvent, ValueType};

fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entity_runtime=info".into()),
        )
        .init();

    info!("Entity runtime starting...");

    let config = match std::env::var("ENTITY_RUNTIME_CONFIG") {
        Ok(path) => load_config(&path)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => RuntimeConfig::from_env(),
    };
    let mgmt = ManagementContext::new(config)?;

    let status: Sensor<String> = Sensor::new("service.status", ValueType::String);
    let replicas: Sensor<i64> = Sensor::new("service.replicas", ValueType::Integer);
    let region: ConfigKey<String> =
        ConfigKey::new("deploy.region", ValueType::String).with_default("local");

    let service_status = status.clone();
    let service_replicas = replicas.clone();
    let service_region = region.clone();
    let service_type = EntityType::builder("service")
        .sensor(&status)
        .sensor(&replicas)
        .config_key(&region)
        .effector(
            Effector::new("start")
                .with_description("Start the service")
                .parameter(ParameterType::new("replicas", ValueType::Integer).with_default(1))
                .returns(ValueType::Integer),
            move |ctx, args| {
                let entity = ctx.entity();
                let count = args.get("replicas").and_then(Value::as_i64).unwrap_or(1);
                let region = entity.config(&service_region)?.unwrap_or_default();
                info!(entity_id = %entity.id(), region = %region, replicas = count, "Starting service");
                entity.set_attribute(&service_status, "starting".to_string())?;
                entity.set_attribute(&service_replicas, count)?;
                entity.set_attribute(&service_status, "running".to_string())?;
                Ok(json!(count))
            },
        )
        .build();

    let app = mgmt.create_entity(
        EntitySpec::application(EntityType::builder("application").build())
            .display_name("demo")
            .config(&region, "eu-west"),
    )?;
    let web = mgmt.create_entity(
        EntitySpec::new(Arc::clone(&service_type))
            .display_name("web")
            .owner(&app),
    )?;
    let worker = mgmt.create_entity(EntitySpec::new(service_type).display_name("worker").owner(&app))?;

    app.subscriptions()?
        .subscribe_to_children(&app, &status, |event: &SensorEvent| {
            info!(
                producer = %event.producer,
                sensor = %event.sensor,
                old = ?event.old_value,
                value = %event.value,
                "Sensor changed"
            );
        });

    let mut args = Parameters::new();
    args.insert("replicas".to_string(), json!(3));
    let web_task = web.invoke("start", args)?;
    let worker_task = worker.invoke("start", Parameters::new())?;

    let web_replicas = web_task.get()?;
    let worker_replicas = worker_task.get()?;
    app.mark_deployed();

    info!(
        application = %app.display_name(),
        entities = mgmt.count(),
        web_replicas = %web_replicas,
        worker_replicas = %worker_replicas,
        "Demo application deployed"
    );

    Ok(())
}
