use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use census_action_infra::event_bus::{RedisStreamsBroker, RedisStreamsConfig};
use census_action_infra::{AppConfig, EventDispatcher, EventWorker, PostgresActionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    census_action_observability::init(config.log_format);

    let dispatcher_config = config
        .dispatcher_config()
        .context("failed to load fulfilment rules")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to postgres")?;
    let dispatcher = Arc::new(EventDispatcher::new(
        PostgresActionStore::new(pool),
        dispatcher_config,
    ));

    let mut workers = Vec::with_capacity(config.worker_concurrency);
    for index in 0..config.worker_concurrency {
        let broker_config = RedisStreamsConfig::for_worker(&config.broker, index);
        let consumer_name = broker_config.consumer_name.clone();
        let broker = RedisStreamsBroker::connect(broker_config)
            .await
            .with_context(|| format!("failed to connect consumer {consumer_name} to redis"))?;

        workers.push(EventWorker::new(consumer_name, broker, Arc::clone(&dispatcher)).spawn());
    }

    tracing::info!(
        workers = config.worker_concurrency,
        stream_key = %config.broker.stream_key,
        consumer_group = %config.broker.consumer_group,
        "consuming events"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested, draining workers");

    for worker in workers {
        worker.shutdown().await;
    }
    Ok(())
}
