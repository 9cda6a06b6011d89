use scylla::client::session_builder::SessionBuilder;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use event_streams::config::{Backend, Settings};
use event_streams::domain::counter::{counter_service, pseudo_randomizer, Decrement, Increment, Randomize};
use event_streams::event_sourcing::{
    EventStore, InstrumentedEventStore, MemoryEventStore, PostgresEventStore, RedisStreamEventStore,
    ScyllaEventStore, StreamId,
};
use event_streams::metrics::Metrics;
use event_streams::utils::{retry_with_backoff, RetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO, override with RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,event_streams=debug")))
        .init();

    tracing::info!("🚀 Starting event streams counter demo");

    let settings = Settings::from_env()?;

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Event store ===
    let store = connect_store(&settings, metrics.clone()).await?;
    tracing::info!(backend = settings.backend.as_str(), "✅ Event store ready");

    // === 3. Counter lifecycle ===
    let service = counter_service(store.clone(), pseudo_randomizer()).with_metrics(metrics.clone());
    let id = StreamId::new("counter", uuid::Uuid::now_v7().to_string());

    let entity = service.load(&id).await?;
    tracing::info!(stream = %id, initialized = entity.initialized(), "Loaded fresh counter");

    let entity = service.execute(&id, Increment { amount: 7 }).await?;
    tracing::info!(
        stream = %id,
        revision = %entity.revision,
        value = ?entity.state.as_ref().map(|c| c.value()),
        "Incremented by 7"
    );

    let entity = service.execute(&id, Decrement { amount: 5 }).await?;
    tracing::info!(
        stream = %id,
        revision = %entity.revision,
        value = ?entity.state.as_ref().map(|c| c.value()),
        "Decremented by 5"
    );

    let entity = service.execute(&id, Randomize::default()).await?;
    tracing::info!(
        stream = %id,
        revision = %entity.revision,
        value = ?entity.state.as_ref().map(|c| c.value()),
        "Randomized"
    );

    tracing::info!("{}", serde_json::to_string_pretty(&entity)?);

    // === 4. Cleanup ===
    let removed = store.remove(&id).await?;
    tracing::info!(stream = %id, removed, "🧹 Removed demo stream");

    tracing::debug!("Metrics:\n{}", metrics.render()?);
    tracing::info!("Demo complete");

    Ok(())
}

/// Connect the configured backend, wrapped with metrics
async fn connect_store(settings: &Settings, metrics: Arc<Metrics>) -> anyhow::Result<Arc<dyn EventStore>> {
    let backend = settings.backend.as_str();

    let store: Arc<dyn EventStore> = match settings.backend {
        Backend::Memory => Arc::new(InstrumentedEventStore::new(
            MemoryEventStore::new().with_retry(settings.publish_retry.clone()),
            backend,
            metrics,
        )),
        Backend::Scylla => {
            tracing::info!(nodes = ?settings.scylla_nodes, "Connecting to ScyllaDB...");
            let session = retry_with_backoff(RetryConfig::connect(), |_| async {
                SessionBuilder::new().known_nodes(&settings.scylla_nodes).build().await
            })
            .await
            .into_result()?;

            let store = ScyllaEventStore::new(Arc::new(session), &settings.scylla_keyspace, &settings.scylla_table)
                .with_page_size(settings.page_size)
                .with_retry(settings.publish_retry.clone());
            store.ensure_schema().await?;
            Arc::new(InstrumentedEventStore::new(store, backend, metrics))
        }
        Backend::Postgres => {
            tracing::info!("Connecting to Postgres...");
            let url = settings.database_url()?;
            let pool = retry_with_backoff(RetryConfig::connect(), |_| {
                PgPoolOptions::new()
                    .max_connections(settings.database_max_connections)
                    .connect(url)
            })
            .await
            .into_result()?;

            let store = PostgresEventStore::new(pool)
                .with_page_size(settings.page_size)
                .with_retry(settings.publish_retry.clone());
            store.ensure_schema().await?;
            Arc::new(InstrumentedEventStore::new(store, backend, metrics))
        }
        Backend::Redis => {
            tracing::info!(url = %settings.redis_url, "Connecting to Redis...");
            let client = redis::Client::open(settings.redis_url.as_str())?;
            let store = retry_with_backoff(RetryConfig::connect(), |_| RedisStreamEventStore::connect(&client))
                .await
                .into_result()?
                .with_key_prefix(&settings.redis_key_prefix)
                .with_page_size(settings.page_size)
                .with_retry(settings.publish_retry.clone());
            Arc::new(InstrumentedEventStore::new(store, backend, metrics))
        }
    };

    Ok(store)
}
