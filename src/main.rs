use anyhow::{Context, Result};
use nlquery::config::ServiceConfig;
use nlquery::inference::{InferenceEngine, MockEngine};
use nlquery::orchestrator::connect_database;
use nlquery::pool::ProcessorPool;
use nlquery::prompt;
use nlquery::schema::SchemaCache;
use nlquery::server;
use nlquery::NlqService;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::load_default().context("Failed to load configuration")?;
    let engine = build_engine(&config)?;

    // Startup-time failures are process-fatal; nothing is fatal once serving.
    let cache = Arc::new(
        build_schema_cache(&config)
            .await
            .context("Failed to build schema cache")?,
    );
    tracing::info!(tables = cache.table_count(), "schema cache ready");

    let pool = Arc::new(ProcessorPool::new(engine, &config.pool));

    // The grounding prompt is tokenized once and cached into every slot's
    // context before the first request arrives.
    let hint_text = match &config.engine.grounding_hint_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read grounding hints from {}", path.display()))?,
        None => String::new(),
    };
    let grounding = prompt::build_prompt(&cache.listing_for_prompt(), &hint_text, "", "");
    pool.prime_all(&grounding)
        .context("Failed to cache the grounding prompt")?;

    ProcessorPool::spawn_ticker(
        Arc::clone(&pool),
        Duration::from_millis(config.pool.ticker_interval_ms.max(1)),
    );
    tracing::info!(slots = pool.capacity(), "processor pool ready");

    let server_config = config.server.clone();
    let service = NlqService::new(pool, cache, config);
    server::start_server(service, &server_config).await
}

fn build_engine(config: &ServiceConfig) -> Result<Arc<dyn InferenceEngine>> {
    match config.engine.backend.as_str() {
        "mock" => Ok(Arc::new(MockEngine::new(config.pool.slots))),
        other => anyhow::bail!("inference backend '{}' is not compiled into this build", other),
    }
}

/// Cache-first policy: a readable snapshot skips live discovery entirely
/// unless `refresh_on_start` is set. Staleness after a schema migration is
/// the accepted tradeoff for restart latency.
async fn build_schema_cache(config: &ServiceConfig) -> Result<SchemaCache> {
    if !config.schema.refresh_on_start {
        if let Some(path) = &config.schema.snapshot_path {
            if path.exists() {
                return Ok(SchemaCache::load_snapshot(path)?);
            }
        }
    }

    let client = connect_database(&config.database)
        .await
        .context("Database unreachable during schema discovery")?;
    let cache = SchemaCache::build(&client, &config.schema.include).await?;
    if let Some(path) = &config.schema.snapshot_path {
        cache.save_snapshot(path)?;
        tracing::info!(path = %path.display(), "schema snapshot written");
    }
    Ok(cache)
}
