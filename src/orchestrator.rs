//! Request orchestration - per-request control flow and status mapping
//!
//! Stateless glue over the pool, pipeline and materializer. Stage order is
//! fixed: validate, acquire, generate, sanitize, execute, materialize.
//! Input failures are rejected before any resource is acquired; once a slot
//! is held, every exit path releases it through the guard's drop.

use crate::config::{DatabaseConfig, ServiceConfig};
use crate::error::{NlqError, NlqResult, NlqStatus};
use crate::materialize::{execute_and_materialize, ResultData};
use crate::pipeline::GenerationPipeline;
use crate::pool::ProcessorPool;
use crate::prompt::HistoryTurn;
use crate::schema::SchemaCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::{Client, NoTls};

/// The single supported database provider
const PROVIDER_POSTGRES: &str = "PostgreSQL";

/// Inbound request document
#[derive(Debug, Clone, Deserialize)]
pub struct NlqRequest {
    /// Natural-language question (required, non-empty)
    pub query: String,

    /// Prior turns of this conversation, oldest first
    #[serde(default)]
    pub history: Vec<HistoryTurn>,

    /// Produce SQL without executing it
    #[serde(default)]
    pub generate_only: bool,

    // Per-call credential overrides; defaults come from the service config
    #[serde(default)]
    pub db_provider: Option<String>,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub db_username: Option<String>,
    #[serde(default)]
    pub db_password: Option<String>,
    #[serde(default)]
    pub db_hostname: Option<String>,
    #[serde(default)]
    pub db_port: Option<u16>,
}

/// Outbound response document
#[derive(Debug, Serialize)]
pub struct NlqResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResultData>,
}

impl NlqResponse {
    pub fn success(sql: String, data: Option<ResultData>) -> Self {
        Self {
            status: NlqStatus::Success.code(),
            message: None,
            sql: Some(sql),
            data,
        }
    }

    pub fn too_much_data(sql: String, data: Option<ResultData>) -> Self {
        Self {
            status: NlqStatus::TooMuchData.code(),
            message: Some("result exceeds the configured row cap; payload is partial".to_string()),
            sql: Some(sql),
            data,
        }
    }

    pub fn from_error(err: &NlqError) -> Self {
        Self {
            status: err.status().code(),
            message: Some(err.to_string()),
            sql: err.sql().map(str::to_string),
            data: None,
        }
    }

    /// Used by the transport layer for bodies that never reach the service
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::from_error(&NlqError::invalid_payload(message))
    }
}

/// Top-level service object handed to request handlers
pub struct NlqService {
    pool: Arc<ProcessorPool>,
    pipeline: GenerationPipeline,
    config: ServiceConfig,
}

impl NlqService {
    pub fn new(pool: Arc<ProcessorPool>, cache: Arc<SchemaCache>, config: ServiceConfig) -> Self {
        Self {
            pool,
            pipeline: GenerationPipeline::new(cache),
            config,
        }
    }

    pub fn pool(&self) -> &Arc<ProcessorPool> {
        &self.pool
    }

    /// Handle one request end to end. Never panics outward; every failure is
    /// converted into a status document here.
    pub async fn handle(&self, request: &NlqRequest) -> NlqResponse {
        match self.process(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err, "request failed");
                NlqResponse::from_error(&err)
            }
        }
    }

    async fn process(&self, request: &NlqRequest) -> NlqResult<NlqResponse> {
        if request.query.trim().is_empty() {
            return Err(NlqError::invalid_payload("query must not be empty"));
        }
        let provider = request
            .db_provider
            .as_deref()
            .unwrap_or(&self.config.database.provider);
        if provider != PROVIDER_POSTGRES {
            return Err(NlqError::not_supported(provider));
        }

        // Fail fast on bad credentials before any generation resource is
        // touched; generate-only requests never need a connection.
        let client = if request.generate_only {
            None
        } else {
            Some(self.connect(request).await?)
        };

        // Admission control: no slot, no service. Nothing has been acquired
        // when this fails, so the caller can simply retry.
        let guard = self.pool.acquire().ok_or(NlqError::EngineOverloaded)?;

        let sql = self
            .pipeline
            .run(&guard, &request.query, &request.history)
            .await?;

        let client = match client {
            Some(client) => client,
            None => return Ok(NlqResponse::success(sql, None)),
        };
        let result = execute_and_materialize(
            &client,
            &sql,
            self.config.limits.max_rows,
            Duration::from_millis(self.config.database.query_timeout_ms),
        )
        .await?;

        if result.truncated {
            return Ok(NlqResponse::too_much_data(sql, result.data));
        }
        Ok(NlqResponse::success(sql, result.data))
    }

    /// Per-call credential overrides folded over the configured defaults
    fn effective_database(&self, request: &NlqRequest) -> DatabaseConfig {
        let mut db = self.config.database.clone();
        if let Some(host) = &request.db_hostname {
            db.host = host.clone();
        }
        if let Some(port) = request.db_port {
            db.port = port;
        }
        if let Some(name) = &request.db_name {
            db.dbname = name.clone();
        }
        if let Some(user) = &request.db_username {
            db.user = user.clone();
        }
        if let Some(password) = &request.db_password {
            db.password = password.clone();
        }
        db
    }

    async fn connect(&self, request: &NlqRequest) -> NlqResult<Client> {
        connect_database(&self.effective_database(request)).await
    }
}

/// One fail-fast connection attempt; no retry, no backoff
pub async fn connect_database(db: &DatabaseConfig) -> NlqResult<Client> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&db.host)
        .port(db.port)
        .dbname(&db.dbname)
        .user(&db.user)
        .password(&db.password)
        .connect_timeout(Duration::from_secs(db.connect_timeout_secs));

    let (client, connection) = pg
        .connect(NoTls)
        .await
        .map_err(|e| NlqError::connection_failed(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "database connection task ended with error");
        }
    });
    Ok(client)
}
