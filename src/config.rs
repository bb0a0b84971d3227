/// Service configuration management
///
/// Loaded once at startup from a JSON file (path from the `NLQUERY_CONFIG`
/// environment variable or `./nlquery.json`); every section has defaults so an
/// absent file still yields a runnable local configuration.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level service configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Generation slot pool configuration
    pub pool: PoolConfig,

    /// Default database connection parameters (overridable per call)
    pub database: DatabaseConfig,

    /// Schema discovery and snapshot configuration
    pub schema: SchemaConfig,

    /// Result size limits
    pub limits: LimitConfig,

    /// Inference backend selection
    pub engine: EngineConfig,
}

/// Inference backend selection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend name; only backends compiled into this build are accepted
    pub backend: String,

    /// Optional static hint text folded into the grounding prompt that is
    /// tokenized once at startup and cached into every slot
    pub grounding_hint_path: Option<PathBuf>,
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,

    /// Port
    pub port: u16,
}

/// Generation slot pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of reusable generation slots (fixed at startup)
    pub slots: usize,

    /// Background engine-stepping interval (milliseconds)
    pub ticker_interval_ms: u64,

    /// Fallback wait between completion checks when no notification arrives
    pub poll_interval_ms: u64,

    /// Upper bound on a single generation round (milliseconds)
    pub generation_timeout_ms: u64,
}

/// Database connection defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub provider: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,

    /// Fail-fast connection timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Upper bound on a single query execution (milliseconds)
    pub query_timeout_ms: u64,
}

/// Schema discovery configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Schemas to introspect; empty means auto-discover everything except
    /// the system schemas
    pub include: Vec<String>,

    /// Optional on-disk snapshot; when present and readable it is loaded
    /// instead of querying the live database
    pub snapshot_path: Option<PathBuf>,

    /// Force live rediscovery even when a snapshot exists. The snapshot is
    /// never revalidated against the live database otherwise, so a schema
    /// migration requires either this flag or deleting the snapshot.
    pub refresh_on_start: bool,
}

/// Result size limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Maximum number of values materialized per result field
    pub max_rows: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slots: 4,
            ticker_interval_ms: 2,
            poll_interval_ms: 2,
            generation_timeout_ms: 120_000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            provider: "PostgreSQL".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            connect_timeout_secs: 2,
            query_timeout_ms: 30_000,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            snapshot_path: None,
            refresh_on_start: false,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self { max_rows: 1000 }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: "mock".to_string(),
            grounding_hint_path: None,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            pool: PoolConfig::default(),
            database: DatabaseConfig::default(),
            schema: SchemaConfig::default(),
            limits: LimitConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ServiceConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from `NLQUERY_CONFIG` (or `./nlquery.json`), falling back to
    /// defaults when no file exists
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("NLQUERY_CONFIG").unwrap_or_else(|_| "nlquery.json".to_string());
        let path = PathBuf::from(path);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}
