//! End-to-end service flows against a scripted mock engine.
//! No database is required: everything up to execution is exercised, and
//! execution-side behavior is covered at the materializer/error level.

use nlquery::config::{PoolConfig, ServiceConfig};
use nlquery::inference::MockEngine;
use nlquery::pipeline::INVALID_SENTINEL;
use nlquery::pool::ProcessorPool;
use nlquery::prompt::HistoryTurn;
use nlquery::schema::SchemaCache;
use nlquery::{NlqError, NlqRequest, NlqResponse, NlqService, NlqStatus};
use std::sync::Arc;
use std::time::Duration;

const SNAPSHOT: &str = r#"{
    "public": {
        "orders": [
            { "column_name": "id", "data_type": "integer", "constraint_kind": "PRIMARY KEY" },
            { "column_name": "customer_id", "data_type": "integer", "constraint_kind": "FOREIGN KEY",
              "referenced_table": "customers", "referenced_column": "id" },
            { "column_name": "total", "data_type": "numeric" }
        ],
        "customers": [
            { "column_name": "id", "data_type": "integer", "constraint_kind": "PRIMARY KEY" },
            { "column_name": "name", "data_type": "text" }
        ]
    }
}"#;

fn test_cache() -> Arc<SchemaCache> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.json");
    std::fs::write(&path, SNAPSHOT).unwrap();
    Arc::new(SchemaCache::load_snapshot(&path).unwrap())
}

fn service_with(engine: Arc<MockEngine>, slots: usize) -> NlqService {
    let mut config = ServiceConfig::default();
    config.pool = PoolConfig {
        slots,
        ticker_interval_ms: 1,
        poll_interval_ms: 1,
        generation_timeout_ms: 5_000,
    };
    let pool = Arc::new(ProcessorPool::new(engine, &config.pool));
    NlqService::new(pool, test_cache(), config)
}

fn generate_only(query: &str) -> NlqRequest {
    serde_json::from_value(serde_json::json!({
        "query": query,
        "generate_only": true,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_generate_only_success() {
    let engine = Arc::new(MockEngine::new(1).with_responses(["SELECT count(*) FROM orders"]));
    let service = service_with(engine, 1);

    let response = service.handle(&generate_only("how many orders are there")).await;
    assert_eq!(response.status, NlqStatus::Success.code());
    assert_eq!(response.sql.as_deref(), Some("SELECT count(*) FROM orders"));
    assert!(response.data.is_none());
    assert!(response.message.is_none());
}

#[tokio::test]
async fn test_fenced_sql_is_stripped() {
    let engine = Arc::new(MockEngine::new(1).with_responses(["```sql\nSELECT name FROM customers\n```"]));
    let service = service_with(engine, 1);

    let response = service.handle(&generate_only("customer names")).await;
    assert_eq!(response.status, NlqStatus::Success.code());
    assert_eq!(response.sql.as_deref(), Some("SELECT name FROM customers"));
}

#[tokio::test]
async fn test_invalidity_sentinel_means_prompt_invalid() {
    let engine = Arc::new(MockEngine::new(1).with_responses([INVALID_SENTINEL]));
    let service = service_with(engine.clone(), 1);

    // Not generate-only: had the sentinel been missed, execution would have
    // been attempted and failed on the missing database instead.
    let request: NlqRequest =
        serde_json::from_value(serde_json::json!({ "query": "what color is the sky" })).unwrap();
    let response = service.handle(&request).await;
    assert_eq!(response.status, NlqStatus::PromptInvalid.code());
    assert!(response.sql.is_none());
    assert_eq!(engine.submissions(), 1);
}

#[tokio::test]
async fn test_semantic_correction_parse_failure() {
    let engine = Arc::new(MockEngine::new(1).with_responses(["the model rambled instead of json"]));
    let service = service_with(engine.clone(), 1);

    let mut request = generate_only("and only the big ones");
    request.history = vec![HistoryTurn {
        query: "list orders".to_string(),
        sql: "SELECT * FROM orders".to_string(),
    }];
    let response = service.handle(&request).await;
    assert_eq!(response.status, NlqStatus::SemanticCorrectionError.code());
    assert_eq!(engine.submissions(), 1, "second stage must not run");
}

#[tokio::test]
async fn test_multi_turn_two_stage_flow() {
    let correction = r#"{"corrected_query": "orders with total above 100", "tables": ["orders"]}"#;
    let engine = Arc::new(
        MockEngine::new(1).with_responses([correction, "SELECT * FROM orders WHERE total > 100"]),
    );
    let service = service_with(engine.clone(), 1);

    let mut request = generate_only("only above 100");
    request.history = vec![HistoryTurn {
        query: "list orders".to_string(),
        sql: "SELECT * FROM orders".to_string(),
    }];
    let response = service.handle(&request).await;
    assert_eq!(response.status, NlqStatus::Success.code());
    assert_eq!(
        response.sql.as_deref(),
        Some("SELECT * FROM orders WHERE total > 100")
    );
    assert_eq!(engine.submissions(), 2);
}

#[tokio::test]
async fn test_pool_capacity_is_an_upper_bound() {
    let engine = Arc::new(MockEngine::new(2));
    let service = service_with(engine, 2);

    let first = service.pool().acquire().expect("slot 1");
    let second = service.pool().acquire().expect("slot 2");

    let response = service.handle(&generate_only("anything")).await;
    assert_eq!(
        response.status,
        NlqStatus::EngineOverloaded.code(),
        "the N+1-th request must be rejected, not queued"
    );

    drop(first);
    drop(second);
    assert_eq!(service.pool().available(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_slot_leak_under_concurrent_load_and_faults() {
    let responses: Vec<String> = (0..32).map(|i| format!("SELECT {}", i)).collect();
    let engine = Arc::new(
        MockEngine::new(2)
            .with_responses(responses)
            .with_steps_to_finish(3),
    );
    let service = Arc::new(service_with(engine.clone(), 2));
    let ticker = ProcessorPool::spawn_ticker(Arc::clone(service.pool()), Duration::from_millis(1));

    let mut handles = Vec::new();
    for i in 0..32 {
        let service = Arc::clone(&service);
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            // Inject tokenization faults on a quarter of the requests
            if i % 4 == 0 {
                engine.set_fail_tokenize(true);
            } else {
                engine.set_fail_tokenize(false);
            }
            service.handle(&generate_only("concurrent question")).await
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap();
        assert!(
            [
                NlqStatus::Success.code(),
                NlqStatus::EngineOverloaded.code(),
                NlqStatus::InternalServerError.code(),
            ]
            .contains(&response.status),
            "unexpected status {}",
            response.status
        );
    }
    ticker.abort();

    // Whatever mix of outcomes occurred, capacity must be fully restored
    assert_eq!(service.pool().available(), service.pool().capacity());
}

#[tokio::test]
async fn test_db_error_response_carries_sql() {
    let err = NlqError::db("relation \"dropped\" does not exist", "SELECT * FROM dropped");
    let response = NlqResponse::from_error(&err);
    assert_eq!(response.status, NlqStatus::DbError.code());
    assert_eq!(response.sql.as_deref(), Some("SELECT * FROM dropped"));
    assert!(response.message.unwrap().contains("does not exist"));
}
