//! Prompt assembly - delimited sections handed to the generation engine
//!
//! The model is trained against these exact markers and this exact section
//! order; both are part of the external contract and must not change.

/// One prior conversation turn: the user's question and the SQL that answered it
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryTurn {
    pub query: String,
    pub sql: String,
}

/// Render prior turns into the history section body
pub fn render_history(history: &[HistoryTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("Q: {}\nSQL: {}", turn.query, turn.sql))
        .collect::<Vec<_>>()
        .join("\n")
}

fn section(name: &str, body: &str) -> String {
    format!("<{name}_BEGIN>\n{body}\n<{name}_END>\n")
}

/// Assemble the full prompt. Pure; no validation, no length limits - those
/// belong to the caller.
pub fn build_prompt(schema_text: &str, hint_text: &str, history_text: &str, query_text: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&section("SCHEMA", schema_text));
    prompt.push_str(&section("HINT", hint_text));
    prompt.push_str(&section("SQL_HISTORY", history_text));
    prompt.push_str(&section("NL_QUERY", query_text));
    prompt
}
