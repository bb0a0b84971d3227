//! Generation pipeline - one or two synchronous rounds against the shared model
//!
//! Stage A (semantic correction) only runs for multi-turn flows: it rewrites
//! the question in context and proposes the tables it believes are relevant,
//! which narrows the schema hints for stage B. Stage B produces the SQL text,
//! which is then sanitized before anything else may touch it.

use crate::error::{NlqError, NlqResult};
use crate::pool::SlotGuard;
use crate::prompt::{build_prompt, render_history, HistoryTurn};
use crate::schema::SchemaCache;
use serde::Deserialize;
use std::sync::Arc;

/// Literal the model emits when the question cannot be answered from the
/// given schema. Trained behavior; must match the model exactly.
pub const INVALID_SENTINEL: &str = "NLQ_INV";

/// Expected stage-A document
#[derive(Debug, Deserialize)]
struct SemanticCorrection {
    corrected_query: String,
    tables: Vec<String>,
}

pub struct GenerationPipeline {
    cache: Arc<SchemaCache>,
}

impl GenerationPipeline {
    pub fn new(cache: Arc<SchemaCache>) -> Self {
        Self { cache }
    }

    /// Run the full protocol on an already-acquired slot and return sanitized
    /// SQL. Never executes anything.
    pub async fn run(
        &self,
        guard: &SlotGuard,
        query: &str,
        history: &[HistoryTurn],
    ) -> NlqResult<String> {
        let history_text = render_history(history);

        let (hint_text, effective_query) = if history.is_empty() {
            (String::new(), query.to_string())
        } else {
            let correction = self.semantic_correction(guard, &history_text, query).await?;
            let hints = self.narrowed_hints(&correction.tables);
            (hints, correction.corrected_query)
        };

        let prompt = build_prompt(
            &self.cache.listing_for_prompt(),
            &hint_text,
            &history_text,
            &effective_query,
        );
        let raw = guard.generate(&prompt).await?;

        if raw.contains(INVALID_SENTINEL) {
            tracing::info!("model rejected the question as unanswerable");
            return Err(NlqError::PromptInvalid);
        }

        let sql = strip_markdown_fence(&raw);
        if sql.is_empty() {
            return Err(NlqError::internal("model produced empty SQL"));
        }
        Ok(sql)
    }

    /// Stage A: history + raw query in, corrected query + relevant tables out
    async fn semantic_correction(
        &self,
        guard: &SlotGuard,
        history_text: &str,
        query: &str,
    ) -> NlqResult<SemanticCorrection> {
        let prompt = build_prompt("", "", history_text, query);
        let raw = guard.generate(&prompt).await?;
        let cleaned = strip_markdown_fence(&raw);
        let correction: SemanticCorrection = serde_json::from_str(&cleaned)
            .map_err(|e| NlqError::semantic(format!("unparseable correction document: {}", e)))?;
        Ok(correction)
    }

    /// Hint text for the model-proposed tables. A proposal covering every
    /// known table is no narrowing at all, so hints stay empty. Unknown
    /// names are dropped as probable hallucinations, never an error.
    fn narrowed_hints(&self, tables: &[String]) -> String {
        if tables.len() >= self.cache.table_count() {
            return String::new();
        }
        let (hints, unknown) = self.cache.hint_for_tables(tables);
        for table in unknown {
            tracing::warn!(table = %table, "model proposed unknown table, dropping from hints");
        }
        hints
    }
}

/// Strip a Markdown code fence from both ends of plausible fenced SQL.
/// Idempotent: already-stripped text passes through unchanged.
pub fn strip_markdown_fence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= 9 || !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    // Drop the opening fence line (which may carry a language tag)
    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => &trimmed[3..],
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::inference::MockEngine;
    use crate::pool::ProcessorPool;
    use crate::schema::TableRelation;
    use std::collections::BTreeMap;

    fn test_cache() -> Arc<SchemaCache> {
        let relation = |col: &str| TableRelation {
            column_name: col.to_string(),
            data_type: "integer".to_string(),
            constraint_kind: "none".to_string(),
            referenced_table: None,
            referenced_column: None,
        };
        let mut tables = BTreeMap::new();
        tables.insert("orders".to_string(), vec![relation("id"), relation("total")]);
        tables.insert("customers".to_string(), vec![relation("id")]);
        tables.insert("products".to_string(), vec![relation("id")]);
        let mut schemas = BTreeMap::new();
        schemas.insert("public".to_string(), tables);
        Arc::new(SchemaCache::for_tests(schemas))
    }

    fn test_pool(engine: MockEngine) -> (Arc<MockEngine>, ProcessorPool) {
        let engine = Arc::new(engine);
        let pool = ProcessorPool::new(
            engine.clone(),
            &PoolConfig {
                slots: 1,
                ticker_interval_ms: 1,
                poll_interval_ms: 1,
                generation_timeout_ms: 2_000,
            },
        );
        (engine, pool)
    }

    #[test]
    fn test_fence_strip() {
        assert_eq!(
            strip_markdown_fence("```sql\nSELECT 1;\n```"),
            "SELECT 1;"
        );
        assert_eq!(strip_markdown_fence("```\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(strip_markdown_fence("SELECT 1;"), "SELECT 1;");
    }

    #[test]
    fn test_fence_strip_idempotent() {
        let once = strip_markdown_fence("```sql\nSELECT id FROM orders\n```");
        let twice = strip_markdown_fence(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_short_text_untouched() {
        // At or below the plausibility threshold nothing is stripped
        assert_eq!(strip_markdown_fence("```x```"), "```x```");
    }

    #[tokio::test]
    async fn test_single_turn_generation() {
        let (engine, pool) = test_pool(MockEngine::new(1).with_responses(["SELECT 1"]));
        let pipeline = GenerationPipeline::new(test_cache());
        let guard = pool.acquire().unwrap();
        let sql = pipeline.run(&guard, "how many orders", &[]).await.unwrap();
        assert_eq!(sql, "SELECT 1");
        assert_eq!(engine.submissions(), 1, "no stage A for single-turn");
    }

    #[tokio::test]
    async fn test_invalid_sentinel() {
        let (engine, pool) = test_pool(MockEngine::new(1).with_responses([INVALID_SENTINEL]));
        let pipeline = GenerationPipeline::new(test_cache());
        let guard = pool.acquire().unwrap();
        let err = pipeline.run(&guard, "nonsense", &[]).await.unwrap_err();
        assert!(matches!(err, NlqError::PromptInvalid));
        assert_eq!(engine.submissions(), 1);
    }

    #[tokio::test]
    async fn test_semantic_correction_failure_skips_stage_b() {
        let (engine, pool) =
            test_pool(MockEngine::new(1).with_responses(["this is not json at all"]));
        let pipeline = GenerationPipeline::new(test_cache());
        let guard = pool.acquire().unwrap();
        let history = vec![HistoryTurn {
            query: "list orders".to_string(),
            sql: "SELECT * FROM orders".to_string(),
        }];
        let err = pipeline.run(&guard, "just the totals", &history).await.unwrap_err();
        assert!(matches!(err, NlqError::SemanticCorrection { .. }));
        assert_eq!(engine.submissions(), 1, "stage B must not run");
    }

    #[tokio::test]
    async fn test_two_stage_with_narrowed_hints() {
        let correction =
            r#"{"corrected_query": "total per order", "tables": ["orders", "ghost"]}"#;
        let (engine, pool) = test_pool(
            MockEngine::new(1).with_responses([correction, "SELECT total FROM orders"]),
        );
        let pipeline = GenerationPipeline::new(test_cache());
        let guard = pool.acquire().unwrap();
        let history = vec![HistoryTurn {
            query: "list orders".to_string(),
            sql: "SELECT * FROM orders".to_string(),
        }];
        let sql = pipeline.run(&guard, "totals", &history).await.unwrap();
        assert_eq!(sql, "SELECT total FROM orders");
        assert_eq!(engine.submissions(), 2);

        // Stage B prompt carries the narrowed hints; the hallucinated table
        // is dropped silently and the corrected query replaces the raw one.
        let prompts = engine.prompts();
        let stage_b = &prompts[1];
        assert!(stage_b.contains("orders: id integer none; total integer none"));
        assert!(!stage_b.contains("ghost"));
        assert!(stage_b.contains("<NL_QUERY_BEGIN>\ntotal per order\n<NL_QUERY_END>"));
    }

    #[tokio::test]
    async fn test_full_table_list_is_no_narrowing() {
        let correction = r#"{"corrected_query": "q", "tables": ["orders", "customers", "products"]}"#;
        let (engine, pool) =
            test_pool(MockEngine::new(1).with_responses([correction, "SELECT 1"]));
        let pipeline = GenerationPipeline::new(test_cache());
        let guard = pool.acquire().unwrap();
        let history = vec![HistoryTurn {
            query: "q".to_string(),
            sql: "s".to_string(),
        }];
        pipeline.run(&guard, "q", &history).await.unwrap();
        let prompts = engine.prompts();
        assert!(prompts[1].contains("<HINT_BEGIN>\n\n<HINT_END>"));
    }
}
