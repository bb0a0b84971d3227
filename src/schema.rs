//! Schema cache - per-schema table/column/relation metadata
//!
//! Built once per process lifetime, before the pool starts serving, and
//! read-only afterwards. Discovery runs one aggregated catalog query per
//! schema; each row carries the table name plus a JSON sub-document with its
//! columns and constraints. Every relation is folded into two representations
//! at once: a compact listing string injected into prompts, and a structured
//! list used for exact lookup during hallucination checks and second-stage
//! hinting.

use crate::error::{NlqError, NlqResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio_postgres::{Client, SimpleQueryMessage};

/// Schemas never offered to the model
const SYSTEM_SCHEMAS: [&str; 3] = ["pg_catalog", "information_schema", "pg_toast"];

/// One column of a table, with its constraint and referenced relation.
/// Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableRelation {
    pub column_name: String,
    pub data_type: String,
    /// Constraint kind ("none" when the column carries no constraint)
    #[serde(default = "default_constraint")]
    pub constraint_kind: String,
    #[serde(default)]
    pub referenced_table: Option<String>,
    #[serde(default)]
    pub referenced_column: Option<String>,
}

fn default_constraint() -> String {
    "none".to_string()
}

/// Snapshot document: schema name -> table name -> relations
type SchemaMap = BTreeMap<String, BTreeMap<String, Vec<TableRelation>>>;

/// Discovered schema metadata, in both prompt-ready and structured form
#[derive(Debug, Default)]
pub struct SchemaCache {
    /// Schema name -> newline-delimited `table=col1,col2,...` listing
    listings: BTreeMap<String, String>,

    /// Table name -> ordered column relations (flattened across schemas)
    relations: HashMap<String, Vec<TableRelation>>,

    /// Full structured map, kept for snapshot persistence
    schemas: SchemaMap,
}

impl SchemaCache {
    /// Discover metadata from the live database.
    ///
    /// `include` limits discovery to the named schemas; when empty, all
    /// non-system schemas are introspected.
    pub async fn build(client: &Client, include: &[String]) -> NlqResult<Self> {
        let schema_names = if include.is_empty() {
            discover_schemas(client).await?
        } else {
            include.to_vec()
        };

        let mut schemas: SchemaMap = BTreeMap::new();
        for schema in &schema_names {
            let tables = discover_tables(client, schema).await?;
            if !tables.is_empty() {
                schemas.insert(schema.clone(), tables);
            }
        }

        tracing::info!(
            schemas = schemas.len(),
            tables = schemas.values().map(|t| t.len()).sum::<usize>(),
            "schema cache built from live database"
        );
        Ok(Self::from_schema_map(schemas))
    }

    /// Load a previously persisted snapshot. No freshness check is made
    /// against the live database.
    pub fn load_snapshot(path: &Path) -> NlqResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let schemas: SchemaMap = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), "schema cache loaded from snapshot");
        Ok(Self::from_schema_map(schemas))
    }

    /// Persist the cache so the next start can skip live discovery
    pub fn save_snapshot(&self, path: &Path) -> NlqResult<()> {
        let raw = serde_json::to_string_pretty(&self.schemas)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn from_schema_map(schemas: SchemaMap) -> Self {
        let mut listings = BTreeMap::new();
        let mut relations = HashMap::new();

        for (schema, tables) in &schemas {
            let mut lines = Vec::with_capacity(tables.len());
            for (table, columns) in tables {
                let cols: Vec<&str> = columns.iter().map(|c| c.column_name.as_str()).collect();
                lines.push(format!("{}={}", table, cols.join(",")));
                relations.insert(table.clone(), columns.clone());
            }
            listings.insert(schema.clone(), lines.join("\n"));
        }

        Self {
            listings,
            relations,
            schemas,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(schemas: SchemaMap) -> Self {
        Self::from_schema_map(schemas)
    }

    /// Total number of known tables
    pub fn table_count(&self) -> usize {
        self.relations.len()
    }

    /// Exact lookup for one table; `None` means the name is unknown
    /// (a model-proposed unknown name is a hallucination)
    pub fn lookup(&self, table: &str) -> Option<&[TableRelation]> {
        self.relations.get(table).map(|v| v.as_slice())
    }

    /// Compact listing of every known table, used as the schema prompt section
    pub fn listing_for_prompt(&self) -> String {
        self.listings
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Detailed hint text for exactly the named tables, re-hydrating column
    /// type and constraint detail. Unknown names are returned separately so
    /// the caller can log them; they never fail the call.
    pub fn hint_for_tables(&self, tables: &[String]) -> (String, Vec<String>) {
        let mut lines = Vec::new();
        let mut unknown = Vec::new();
        for table in tables {
            match self.lookup(table) {
                Some(columns) => {
                    let detail: Vec<String> = columns
                        .iter()
                        .map(|c| {
                            let mut entry =
                                format!("{} {} {}", c.column_name, c.data_type, c.constraint_kind);
                            if let (Some(rt), Some(rc)) =
                                (c.referenced_table.as_ref(), c.referenced_column.as_ref())
                            {
                                entry.push_str(&format!(" -> {}({})", rt, rc));
                            }
                            entry
                        })
                        .collect();
                    lines.push(format!("{}: {}", table, detail.join("; ")));
                }
                None => unknown.push(table.clone()),
            }
        }
        (lines.join("\n"), unknown)
    }
}

/// All non-system schemas visible in the catalog
async fn discover_schemas(client: &Client) -> NlqResult<Vec<String>> {
    let query = format!(
        "SELECT schema_name FROM information_schema.schemata \
         WHERE schema_name NOT IN ('{}', '{}', '{}')",
        SYSTEM_SCHEMAS[0], SYSTEM_SCHEMAS[1], SYSTEM_SCHEMAS[2]
    );
    let messages = client
        .simple_query(&query)
        .await
        .map_err(|e| NlqError::internal(format!("schema discovery failed: {}", e)))?;

    let mut names = Vec::new();
    for message in messages {
        if let SimpleQueryMessage::Row(row) = message {
            if let Some(name) = row.get(0) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Column object embedded in each metadata row
#[derive(Debug, Deserialize)]
struct ColumnDoc {
    column_name: String,
    data_type: String,
    #[serde(default)]
    constraint_kind: Option<String>,
    #[serde(default)]
    referenced_table: Option<String>,
    #[serde(default)]
    referenced_column: Option<String>,
}

/// One aggregated metadata query per schema: every base table with its
/// columns and any key constraint, as a JSON sub-document per row
async fn discover_tables(
    client: &Client,
    schema: &str,
) -> NlqResult<BTreeMap<String, Vec<TableRelation>>> {
    let query = format!(
        "SELECT t.table_name, \
                json_agg(json_build_object( \
                    'column_name', c.column_name, \
                    'data_type', c.data_type, \
                    'constraint_kind', tc.constraint_type, \
                    'referenced_table', ccu.table_name, \
                    'referenced_column', ccu.column_name \
                ) ORDER BY c.ordinal_position) AS columns \
         FROM information_schema.tables t \
         JOIN information_schema.columns c \
           ON c.table_name = t.table_name AND c.table_schema = t.table_schema \
         LEFT JOIN information_schema.key_column_usage kcu \
           ON kcu.table_name = c.table_name \
          AND kcu.column_name = c.column_name \
          AND kcu.table_schema = c.table_schema \
         LEFT JOIN information_schema.table_constraints tc \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
         LEFT JOIN information_schema.constraint_column_usage ccu \
           ON ccu.constraint_name = tc.constraint_name \
          AND tc.constraint_type = 'FOREIGN KEY' \
         WHERE t.table_schema = '{}' AND t.table_type = 'BASE TABLE' \
         GROUP BY t.table_name",
        schema
    );

    let messages = client
        .simple_query(&query)
        .await
        .map_err(|e| NlqError::internal(format!("metadata query failed: {}", e)))?;

    let mut tables = BTreeMap::new();
    for message in messages {
        let row = match message {
            SimpleQueryMessage::Row(row) => row,
            _ => continue,
        };
        let table = match row.get(0) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let doc = row.get(1).unwrap_or("[]");
        let columns: Vec<ColumnDoc> = serde_json::from_str(doc).map_err(|e| {
            NlqError::internal(format!("bad metadata document for table {}: {}", table, e))
        })?;
        let relations = columns
            .into_iter()
            .map(|c| TableRelation {
                column_name: c.column_name,
                data_type: c.data_type,
                constraint_kind: c.constraint_kind.unwrap_or_else(default_constraint),
                referenced_table: c.referenced_table,
                referenced_column: c.referenced_column,
            })
            .collect();
        tables.insert(table, relations);
    }
    Ok(tables)
}
