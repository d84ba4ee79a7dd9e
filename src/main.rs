mod blob;
mod config;
mod db;
mod kafka;
mod models;
mod processor;
mod queue;
mod runtime;
#[cfg(test)]
mod testing;

use anyhow::Context;
use blob::FsBlobStore;
use config::{AppConfig, Role};
use db::alert_store::PgAlertStore;
use db::telemetry_store::PgTelemetryStore;
use processor::alert_evaluator::AlertEvaluator;
use processor::archive_writer::ArchiveWriter;
use processor::dispatcher::Dispatcher;
use processor::timeseries_writer::TimeSeriesWriter;
use runtime::BatchHandler;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Telemetry Fan-Out Service, roles: {:?}", config.roles);

    if config.needs_database() {
        let pool = db::shared_pool(&config.database_url, config.db_max_connections)
            .await
            .context("Error connecting to database")?;
        info!("Connected to database");

        if config.db_bootstrap_schema {
            db::schema::create_schema(&pool).await?;
            info!("Database schema ready");
        }
    }

    let config = Arc::new(config);
    let mut consumers = JoinSet::new();
    for role in config.roles.clone() {
        let handler = build_handler(&config, role).await?;
        let config = config.clone();
        consumers.spawn(async move {
            kafka::start_batch_consumer(&config, role, handler)
                .await
                .with_context(|| format!("{} consumer stopped", role))
        });
    }

    tokio::select! {
        Some(result) = consumers.join_next() => {
            match result {
                Ok(Err(e)) => error!("{:#}", e),
                Err(e) => error!("Consumer task panicked: {}", e),
                Ok(Ok(())) => {}
            }
            consumers.shutdown().await;
            anyhow::bail!("A consumer exited, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            consumers.shutdown().await;
        }
    }

    Ok(())
}

async fn build_handler(config: &AppConfig, role: Role) -> anyhow::Result<Arc<dyn BatchHandler>> {
    let handler: Arc<dyn BatchHandler> = match role {
        Role::Dispatcher => {
            let queues = Arc::new(kafka::KafkaQueues::new(config)?);
            Arc::new(Dispatcher::new(queues, config.dispatch_concurrency))
        }
        Role::Timeseries => {
            let pool = db::shared_pool(&config.database_url, config.db_max_connections).await?;
            Arc::new(TimeSeriesWriter::new(Arc::new(PgTelemetryStore::new(pool))))
        }
        Role::Archive => {
            let store = Arc::new(FsBlobStore::new(&config.archive_root));
            Arc::new(ArchiveWriter::new(store, config.archive_concurrency))
        }
        Role::Alerts => {
            let pool = db::shared_pool(&config.database_url, config.db_max_connections).await?;
            Arc::new(AlertEvaluator::new(Arc::new(PgAlertStore::new(pool))))
        }
    };
    Ok(handler)
}
