//! SurrealDB schema provisioning
//!
//! Defines every table, field, analyzer, index, view and graph definition the
//! log backend relies on. Provisioning is idempotent: existing objects are
//! detected through `INFO FOR DB` / `INFO FOR TABLE` and only missing ones are
//! defined. The returned [`SchemaReport`] lists what was created.

use std::collections::HashSet;

use serde::Serialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::schema::{
    AGENT_LEARNINGS, LOG_CAUSALITY, LOG_EVENTS, LOG_EVENTS_VIEW, LOG_RELATIONSHIPS, SCRIPT_RUNS,
};
use crate::Result;

/// Registry table holding named graph definitions
pub const GRAPH_DEFINITIONS: &str = "graph_definitions";
/// Text analyzer used by the full-text indexes
pub const LOG_TEXT_ANALYZER: &str = "log_text";

/// Kind of schema object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Analyzer,
    Table,
    EdgeTable,
    View,
    Index,
    Graph,
}

/// One provisioned object, with the statements that define it
struct SchemaObject {
    kind: ObjectKind,
    /// Owning table for indexes
    table: Option<&'static str>,
    name: &'static str,
    ddl: &'static str,
}

impl SchemaObject {
    fn label(&self) -> String {
        match self.table {
            Some(table) => format!("{:?}:{}.{}", self.kind, table, self.name).to_lowercase(),
            None => format!("{:?}:{}", self.kind, self.name).to_lowercase(),
        }
    }
}

/// Outcome of [`ensure_schema`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    pub database: String,
    /// Objects defined by this invocation (`kind:name` or `kind:table.name`)
    pub created: Vec<String>,
    /// Objects that were already present
    pub existing: Vec<String>,
}

impl SchemaReport {
    /// True when nothing had to be created
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
    }
}

/// Ordered so that analyzers precede the indexes using them and tables
/// precede their indexes and views.
const OBJECTS: &[SchemaObject] = &[
    SchemaObject {
        kind: ObjectKind::Analyzer,
        table: None,
        name: LOG_TEXT_ANALYZER,
        ddl: "DEFINE ANALYZER IF NOT EXISTS log_text TOKENIZERS blank, class, punct FILTERS lowercase, ascii, snowball(english);",
    },
    // -- log_events --------------------------------------------------------
    SchemaObject {
        kind: ObjectKind::Table,
        table: None,
        name: LOG_EVENTS,
        ddl: r#"
            DEFINE TABLE IF NOT EXISTS log_events SCHEMALESS;
            DEFINE FIELD IF NOT EXISTS timestamp ON TABLE log_events TYPE datetime;
            DEFINE FIELD IF NOT EXISTS level ON TABLE log_events TYPE string;
            DEFINE FIELD IF NOT EXISTS message ON TABLE log_events TYPE string;
            DEFINE FIELD IF NOT EXISTS execution_id ON TABLE log_events TYPE string;
            DEFINE FIELD IF NOT EXISTS script_name ON TABLE log_events TYPE string;
        "#,
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS),
        name: "idx_log_events_execution_ts",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_log_events_execution_ts ON TABLE log_events FIELDS execution_id, timestamp;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS),
        name: "idx_log_events_level_ts",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_log_events_level_ts ON TABLE log_events FIELDS level, timestamp;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS),
        name: "idx_log_events_script",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_log_events_script ON TABLE log_events FIELDS script_name;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS),
        name: "idx_log_events_message",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_log_events_message ON TABLE log_events FIELDS message SEARCH ANALYZER log_text BM25;",
    },
    // -- script_runs -------------------------------------------------------
    SchemaObject {
        kind: ObjectKind::Table,
        table: None,
        name: SCRIPT_RUNS,
        ddl: r#"
            DEFINE TABLE IF NOT EXISTS script_runs SCHEMALESS;
            DEFINE FIELD IF NOT EXISTS execution_id ON TABLE script_runs TYPE string;
            DEFINE FIELD IF NOT EXISTS script_name ON TABLE script_runs TYPE string;
            DEFINE FIELD IF NOT EXISTS start_time ON TABLE script_runs TYPE datetime;
            DEFINE FIELD IF NOT EXISTS status ON TABLE script_runs TYPE string
                ASSERT $value IN ['running', 'success', 'failed'];
        "#,
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(SCRIPT_RUNS),
        name: "idx_script_runs_execution_id",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_script_runs_execution_id ON TABLE script_runs FIELDS execution_id UNIQUE;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(SCRIPT_RUNS),
        name: "idx_script_runs_script_start",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_script_runs_script_start ON TABLE script_runs FIELDS script_name, start_time;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(SCRIPT_RUNS),
        name: "idx_script_runs_status",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_script_runs_status ON TABLE script_runs FIELDS status;",
    },
    // -- agent_learnings ---------------------------------------------------
    SchemaObject {
        kind: ObjectKind::Table,
        table: None,
        name: AGENT_LEARNINGS,
        ddl: r#"
            DEFINE TABLE IF NOT EXISTS agent_learnings SCHEMALESS;
            DEFINE FIELD IF NOT EXISTS content ON TABLE agent_learnings TYPE string;
            DEFINE FIELD IF NOT EXISTS timestamp ON TABLE agent_learnings TYPE datetime;
        "#,
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(AGENT_LEARNINGS),
        name: "idx_agent_learnings_type",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_agent_learnings_type ON TABLE agent_learnings FIELDS `type`;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(AGENT_LEARNINGS),
        name: "idx_agent_learnings_execution",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_agent_learnings_execution ON TABLE agent_learnings FIELDS metadata.execution_id, timestamp;",
    },
    // -- log_causality -----------------------------------------------------
    SchemaObject {
        kind: ObjectKind::EdgeTable,
        table: None,
        name: LOG_CAUSALITY,
        ddl: "DEFINE TABLE IF NOT EXISTS log_causality SCHEMALESS TYPE RELATION IN log_events OUT log_events | agent_learnings;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_CAUSALITY),
        name: "idx_log_causality_type",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_log_causality_type ON TABLE log_causality FIELDS edge_type;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_CAUSALITY),
        name: "idx_log_causality_execution",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_log_causality_execution ON TABLE log_causality FIELDS context.execution_id;",
    },
    // -- log_events_view ---------------------------------------------------
    SchemaObject {
        kind: ObjectKind::View,
        table: None,
        name: LOG_EVENTS_VIEW,
        ddl: r#"
            DEFINE TABLE IF NOT EXISTS log_events_view SCHEMALESS AS
                SELECT message, level, script_name, tags, execution_id, timestamp FROM log_events;
        "#,
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS_VIEW),
        name: "idx_view_message",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_view_message ON TABLE log_events_view FIELDS message SEARCH ANALYZER log_text BM25;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS_VIEW),
        name: "idx_view_level",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_view_level ON TABLE log_events_view FIELDS level;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS_VIEW),
        name: "idx_view_script_name",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_view_script_name ON TABLE log_events_view FIELDS script_name;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS_VIEW),
        name: "idx_view_tags",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_view_tags ON TABLE log_events_view FIELDS tags;",
    },
    SchemaObject {
        kind: ObjectKind::Index,
        table: Some(LOG_EVENTS_VIEW),
        name: "idx_view_execution_id",
        ddl: "DEFINE INDEX IF NOT EXISTS idx_view_execution_id ON TABLE log_events_view FIELDS execution_id;",
    },
    // -- log_relationships -------------------------------------------------
    SchemaObject {
        kind: ObjectKind::Table,
        table: None,
        name: GRAPH_DEFINITIONS,
        ddl: "DEFINE TABLE IF NOT EXISTS graph_definitions SCHEMALESS;",
    },
    SchemaObject {
        kind: ObjectKind::Graph,
        table: None,
        name: LOG_RELATIONSHIPS,
        ddl: r#"
            CREATE graph_definitions:log_relationships CONTENT {
                name: 'log_relationships',
                edge_definitions: [{
                    collection: 'log_causality',
                    from: ['log_events'],
                    to: ['log_events', 'agent_learnings']
                }],
                created_at: time::now()
            };
        "#,
    },
];

/// Names already present in the target database
#[derive(Debug, Default)]
struct ExistingObjects {
    tables: HashSet<String>,
    analyzers: HashSet<String>,
    /// `table.index`
    indexes: HashSet<String>,
    graphs: HashSet<String>,
}

impl ExistingObjects {
    fn contains(&self, object: &SchemaObject) -> bool {
        match object.kind {
            ObjectKind::Analyzer => self.analyzers.contains(object.name),
            ObjectKind::Table | ObjectKind::EdgeTable | ObjectKind::View => {
                self.tables.contains(object.name)
            }
            ObjectKind::Index => match object.table {
                Some(table) => self.indexes.contains(&format!("{}.{}", table, object.name)),
                None => false,
            },
            ObjectKind::Graph => self.graphs.contains(object.name),
        }
    }
}

fn object_keys(info: &serde_json::Value, section: &str) -> HashSet<String> {
    info.get(section)
        .and_then(|v| v.as_object())
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

async fn info_for(db: &Surreal<Any>, statement: &str) -> Result<serde_json::Value> {
    let mut res = db
        .query(statement)
        .await
        .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;
    let info: Option<serde_json::Value> = res
        .take(0)
        .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;
    Ok(info.unwrap_or(serde_json::Value::Null))
}

async fn existing_objects(db: &Surreal<Any>) -> Result<ExistingObjects> {
    let db_info = info_for(db, "INFO FOR DB;").await?;
    let mut existing = ExistingObjects {
        tables: object_keys(&db_info, "tables"),
        analyzers: object_keys(&db_info, "analyzers"),
        ..Default::default()
    };

    for table in [LOG_EVENTS, SCRIPT_RUNS, AGENT_LEARNINGS, LOG_CAUSALITY, LOG_EVENTS_VIEW] {
        if !existing.tables.contains(table) {
            continue;
        }
        let table_info = info_for(db, &format!("INFO FOR TABLE {};", table)).await?;
        for index in object_keys(&table_info, "indexes") {
            existing.indexes.insert(format!("{}.{}", table, index));
        }
    }

    if existing.tables.contains(GRAPH_DEFINITIONS) {
        let mut res = db
            .query("SELECT VALUE name FROM graph_definitions")
            .await
            .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;
        let names: Vec<String> = res
            .take(0)
            .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;
        existing.graphs.extend(names);
    }

    Ok(existing)
}

/// Provision the full log schema in the currently selected database.
///
/// Safe to call repeatedly; a second call reports an empty `created` list.
#[instrument(skip(db))]
pub async fn ensure_schema(db: &Surreal<Any>, database: &str) -> Result<SchemaReport> {
    info!("Ensuring log schema");

    let existing = existing_objects(db).await?;
    let mut report = SchemaReport {
        database: database.to_string(),
        ..Default::default()
    };

    for object in OBJECTS {
        let label = object.label();
        if existing.contains(object) {
            report.existing.push(label);
            continue;
        }

        debug!(object = %label, "defining schema object");
        db.query(object.ddl)
            .await
            .and_then(|res| res.check())
            .map_err(|e| StoreError::SchemaSetup(format!("{}: {}", label, e)))?;
        report.created.push(label);
    }

    info!(
        created = report.created.len(),
        existing = report.existing.len(),
        "Log schema ready"
    );
    Ok(report)
}
