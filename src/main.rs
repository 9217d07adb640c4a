use anyhow::{Context, Result};
use shift_telemetry::catalog::PgEntityCatalog;
use shift_telemetry::config::{Config, StateBackend};
use shift_telemetry::correlate::{LogCorrelator, PgIncidentLog};
use shift_telemetry::db::{build_pool, ensure_schema};
use shift_telemetry::ingest::TelemetryIngestor;
use shift_telemetry::mqtt;
use shift_telemetry::publish::MqttRealtimePublisher;
use shift_telemetry::reports::PgReportStore;
use shift_telemetry::scheduler::ReportScheduler;
use shift_telemetry::store::{LiveStateStore, MemoryStateStore, RedisStateStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,shift_telemetry=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(normalize_otlp_http_endpoint(endpoint));
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "shift-telemetry"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn build_state_store(config: &Config) -> Result<Arc<dyn LiveStateStore>> {
    match config.state_backend {
        StateBackend::Redis => {
            let store = RedisStateStore::connect(&config.redis_url)
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(store))
        }
        StateBackend::Memory => {
            if config.roles.ingest != config.roles.scheduler {
                tracing::warn!("memory state backend only shares state within one process");
            }
            Ok(Arc::new(MemoryStateStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    tracing::info!(
        ingest = config.roles.ingest,
        scheduler = config.roles.scheduler,
        backend = ?config.state_backend,
        timezone = %config.clock.tz(),
        "starting shift-telemetry"
    );

    let store = build_state_store(&config).await?;
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    if config.roles.scheduler {
        let database_url = config
            .database_url
            .as_deref()
            .context("scheduler role requires a database url")?;
        let pool = build_pool(database_url, config.db_pool_size).await?;
        ensure_schema(&pool).await?;
        let scheduler = Arc::new(ReportScheduler::new(
            store.clone(),
            Arc::new(PgEntityCatalog::new(pool.clone())),
            LogCorrelator::new(Arc::new(PgIncidentLog::new(pool.clone()))),
            Arc::new(PgReportStore::new(pool)),
            config.clock,
            config.scheduler_settings(),
        ));
        tasks.push(scheduler.start(cancel.clone()));
    }

    let mut publisher_handle = None;
    if config.roles.ingest {
        let (publisher, handle) = MqttRealtimePublisher::new(&config);
        publisher_handle = Some(handle);
        let ingestor =
            TelemetryIngestor::new(store.clone(), Arc::new(publisher), config.ingest_settings());
        let listener_config = config.clone();
        let listener_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = mqtt::run_listener(listener_config, ingestor, listener_cancel).await {
                tracing::error!(error = %err, "MQTT listener exited");
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    cancel.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "task failed during shutdown");
        }
    }
    if let Some(handle) = publisher_handle {
        handle.abort();
    }

    Ok(())
}
