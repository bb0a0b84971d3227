//! # NLQuery
//!
//! Turns a natural-language question into an executable SQL statement,
//! executes it, and returns a typed, size-bounded result - all around one
//! shared, expensive-to-duplicate text-generation model.
//!
//! The heart of the crate is the bounded coordinator over that shared model:
//! a fixed pool of reusable generation slots with non-blocking admission
//! control ([`pool::ProcessorPool`]), a schema-grounded prompt builder, a
//! two-stage generation protocol with output sanitization
//! ([`pipeline::GenerationPipeline`]), and typed result materialization with
//! a hard row cap ([`materialize`]).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nlquery::config::ServiceConfig;
//! use nlquery::inference::MockEngine;
//! use nlquery::pool::ProcessorPool;
//! use nlquery::schema::SchemaCache;
//! use nlquery::{NlqRequest, NlqService};
//!
//! # async fn run() {
//! let config = ServiceConfig::default();
//! let engine = Arc::new(MockEngine::new(config.pool.slots));
//! let pool = Arc::new(ProcessorPool::new(engine, &config.pool));
//! let cache = Arc::new(SchemaCache::default());
//! let service = NlqService::new(pool, cache, config);
//!
//! let request: NlqRequest = serde_json::from_str(
//!     r#"{ "query": "how many orders shipped last week?", "generate_only": true }"#,
//! ).unwrap();
//! let response = service.handle(&request).await;
//! println!("status {}", response.status);
//! # }
//! ```

// Internal modules
pub mod config;
pub mod error;
pub mod inference;
pub mod materialize;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod prompt;
pub mod schema;
pub mod server;

// Public API - main types users need
pub use error::{NlqError, NlqResult, NlqStatus};
pub use orchestrator::{NlqRequest, NlqResponse, NlqService};
pub use pool::{ProcessorPool, SlotGuard};
pub use schema::{SchemaCache, TableRelation};
