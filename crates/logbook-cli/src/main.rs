//! Logbook CLI
//!
//! The `logbook` command is the operator surface over a Logbook database.
//!
//! ## Commands
//!
//! - `init-schema`: provision tables, analyzers and indexes
//! - `ingest`: write NDJSON log records from stdin or a file
//! - `search`: full-text search with filters
//! - `errors`: recurring error patterns and their recorded fixes
//! - `summary` / `graph`: inspect one execution
//! - `runs`: list recent executions
//! - `prune`: retention by age or execution id
//! - `memory`: add, search and inspect agent learnings
//! - `buffer`: replay or restore the on-disk fallback buffer

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use logbook_core::{
    parse_time_range, EdgeType, ExecutionManager, LogLevel, LogRecord, LogSink, PruneCriteria,
    SearchFilters, SinkConfig,
};
use logbook_store::{DbConfig, SurrealHandle};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "logbook")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Execution log backend for scripts and agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Define tables, analyzers and indexes (idempotent)
    InitSchema,

    /// Write newline-delimited JSON records through the log sink
    Ingest {
        /// Input file (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Execution id for records that carry none
        #[arg(long)]
        execution: Option<String>,

        /// Script name for records that carry none
        #[arg(long)]
        script: Option<String>,
    },

    /// Full-text search over log messages
    Search {
        /// Query text; empty lists the newest matching records
        #[arg(default_value = "")]
        query: String,

        /// Only this level (DEBUG, INFO, WARNING, ...)
        #[arg(short, long)]
        level: Option<LogLevel>,

        /// Only this script
        #[arg(short, long)]
        script: Option<String>,

        /// Only this execution
        #[arg(short, long)]
        execution: Option<String>,

        /// Required tag (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,

        /// Earliest timestamp (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Latest timestamp (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Additional filters as a JSON object
        #[arg(long)]
        filters: Option<String>,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Recurring ERROR/CRITICAL messages, grouped with digits normalised
    Errors {
        /// Look-back window: <n>h, <n>d, <n>w or <n>m
        #[arg(long, default_value = "24h", value_parser = parse_time_range)]
        since: chrono::Duration,

        /// Ignore the window and scan every stored error
        #[arg(long, conflicts_with = "since")]
        all_time: bool,

        /// Minimum occurrences for a message to count as a pattern
        #[arg(long, default_value = "2")]
        min_occurrences: usize,
    },

    /// Run info, level counts, errors and learnings of one execution
    Summary {
        /// Execution id
        execution_id: String,
    },

    /// Build (and persist) the causality graph of one execution
    Graph {
        /// Execution id
        execution_id: String,

        /// Only list edges of this type
        #[arg(long)]
        edge_type: Option<EdgeType>,
    },

    /// List recent executions, newest first
    Runs {
        /// Only this script
        #[arg(short, long)]
        script: Option<String>,

        /// Maximum number of runs
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Delete old records
    Prune {
        /// Records older than this many days
        #[arg(long)]
        older_than_days: Option<u32>,

        /// Records of this execution (repeatable)
        #[arg(long)]
        execution: Vec<String>,

        /// Count what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Agent memory operations
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// On-disk fallback buffer operations
    Buffer {
        #[command(subcommand)]
        action: BufferAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Store a learning
    Add {
        /// Learning text
        content: String,

        /// Learning type
        #[arg(short = 't', long = "type", default_value = "general")]
        learning_type: String,

        /// Metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Keyword search, best match first
    Search {
        /// Query text
        query: String,

        /// Only this type
        #[arg(short = 't', long = "type")]
        learning_type: Option<String>,

        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },

    /// Newest learnings
    Recent {
        #[arg(short = 't', long = "type")]
        learning_type: Option<String>,

        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Counts per type and most accessed learnings
    Stats {
        #[arg(short = 't', long = "type")]
        learning_type: Option<String>,
    },
}

#[derive(Subcommand)]
enum BufferAction {
    /// Show pending and quarantined buffer files
    Status,

    /// Write buffered records to the database
    Replay {
        /// Move quarantined files back first
        #[arg(long)]
        restore_quarantined: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    logbook_core::telemetry::init_tracing(cli.json, level);

    let db_config = DbConfig::from_env();

    match cli.command {
        Commands::InitSchema => cmd_init_schema(&db_config).await,
        Commands::Buffer { action } => match action {
            BufferAction::Status => cmd_buffer_status(&SinkConfig::from_env()?).await,
            BufferAction::Replay {
                restore_quarantined,
            } => {
                let handle = connect(&db_config).await?;
                cmd_buffer_replay(&handle, SinkConfig::from_env()?, restore_quarantined).await
            }
        },
        command => {
            let handle = connect(&db_config).await?;
            let sink = LogSink::start(SinkConfig::from_env()?, Arc::new(handle.clone()))
                .await
                .context("Failed to start log sink")?;
            let manager = ExecutionManager::new(handle, sink.clone());
            let result = run_command(&manager, command).await;
            let stats = sink.stop().await;
            if stats.buffered_logs > 0 {
                warn!(
                    buffered = stats.buffered_logs,
                    buffer_dir = %sink.config().buffer_dir.display(),
                    "some records were buffered to disk; run `logbook buffer replay` later"
                );
            }
            result
        }
    }
}

async fn connect(config: &DbConfig) -> Result<SurrealHandle> {
    SurrealHandle::setup(config)
        .await
        .context("Failed to connect to Logbook database")
}

async fn run_command(manager: &ExecutionManager, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest {
            file,
            execution,
            script,
        } => {
            let defaults = IngestDefaults { execution, script };
            let report = match file {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .context(format!("Failed to open {:?}", path))?;
                    ingest(manager.sink(), BufReader::new(file), &defaults).await?
                }
                None => ingest(manager.sink(), BufReader::new(tokio::io::stdin()), &defaults).await?,
            };
            print_json(&report)
        }
        Commands::Search {
            query,
            level,
            script,
            execution,
            tag,
            since,
            until,
            filters,
            limit,
        } => {
            let mut search_filters = match filters {
                Some(raw) => SearchFilters::from_map(&parse_object(&raw, "--filters")?),
                None => SearchFilters::new(),
            };
            if let Some(level) = level {
                search_filters = search_filters.level(level);
            }
            if let Some(script) = script {
                search_filters = search_filters.script(script);
            }
            if let Some(execution) = execution {
                search_filters = search_filters.execution(execution);
            }
            for t in tag {
                search_filters = search_filters.tag(t);
            }
            if since.is_some() || until.is_some() {
                search_filters = search_filters.between(since, until);
            }
            cmd_search(manager, &query, &search_filters, limit).await
        }
        Commands::Errors {
            since,
            all_time,
            min_occurrences,
        } => {
            let window = (!all_time).then_some(since);
            let patterns = manager
                .search()
                .error_patterns(window, min_occurrences)
                .await?;
            if patterns.is_empty() {
                info!(min_occurrences, "no recurring errors found");
            }
            print_json(&patterns)
        }
        Commands::Summary { execution_id } => {
            print_json(&manager.summary(&execution_id).await?)
        }
        Commands::Graph {
            execution_id,
            edge_type,
        } => cmd_graph(manager, &execution_id, edge_type).await,
        Commands::Runs { script, limit } => {
            let runs = manager.handle().list_runs(script.as_deref(), limit).await?;
            for run in &runs {
                println!(
                    "{}  {:<8} {:<20} {}",
                    run.start_time.format("%Y-%m-%d %H:%M:%S"),
                    run.status,
                    run.script_name,
                    run.execution_id
                );
            }
            Ok(())
        }
        Commands::Prune {
            older_than_days,
            execution,
            dry_run,
        } => {
            let criteria = PruneCriteria {
                older_than_days,
                execution_ids: (!execution.is_empty()).then_some(execution),
            };
            let report = manager.prune(&criteria, dry_run).await?;
            if !report.applied {
                return Err(anyhow!(
                    "nothing to prune: pass --older-than-days and/or --execution"
                ));
            }
            print_json(&report)
        }
        Commands::Memory { action } => cmd_memory(manager, action).await,
        Commands::InitSchema | Commands::Buffer { .. } => Ok(()),
    }
}

/// Provision the schema and list what was created
async fn cmd_init_schema(config: &DbConfig) -> Result<()> {
    let handle = SurrealHandle::connect(config)
        .await
        .context("Failed to connect to Logbook database")?;
    let report = handle.ensure_schema().await?;

    if report.is_noop() {
        println!("Schema already up to date in {}", report.database);
    } else {
        println!("Initialized schema in {}", report.database);
        for object in &report.created {
            println!("  + {}", object);
        }
    }
    Ok(())
}

// ========== Ingest ==========

/// Fallbacks applied to records that carry no ids
#[derive(Debug, Default)]
struct IngestDefaults {
    execution: Option<String>,
    script: Option<String>,
}

/// One NDJSON input line
#[derive(Debug, Deserialize)]
struct IngestLine {
    #[serde(default = "default_level")]
    level: String,
    message: String,
    execution_id: Option<String>,
    script_name: Option<String>,
    function_name: Option<String>,
    file_path: Option<String>,
    line_number: Option<u32>,
    #[serde(default)]
    extra_data: Map<String, Value>,
    #[serde(default)]
    tags: Vec<String>,
    timestamp: Option<DateTime<Utc>>,
}

fn default_level() -> String {
    "INFO".to_string()
}

#[derive(Debug, Default, PartialEq, Serialize)]
struct IngestReport {
    accepted: u64,
    rejected: u64,
    written: usize,
    buffered: usize,
}

fn parse_line(line: &str, defaults: &IngestDefaults) -> Result<LogRecord> {
    let parsed: IngestLine = serde_json::from_str(line).context("invalid JSON record")?;
    let level: LogLevel = parsed.level.parse().map_err(|e: String| anyhow!(e))?;

    let mut record = LogRecord::new(level, parsed.message).with_tags(parsed.tags);
    record.extra_data = parsed.extra_data;
    record.function_name = parsed.function_name;
    record.file_path = parsed.file_path;
    record.line_number = parsed.line_number;
    if let Some(id) = parsed.execution_id.or_else(|| defaults.execution.clone()) {
        record = record.with_execution(id);
    }
    if let Some(name) = parsed.script_name.or_else(|| defaults.script.clone()) {
        record = record.with_script(name);
    }
    if let Some(ts) = parsed.timestamp {
        record = record.at(ts);
    }
    Ok(record)
}

/// Feed every non-blank line to the sink; bad lines are skipped and counted.
async fn ingest<R>(sink: &LogSink, reader: R, defaults: &IngestDefaults) -> Result<IngestReport>
where
    R: AsyncBufRead + Unpin,
{
    let mut report = IngestReport::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line, defaults) {
            Ok(record) => {
                sink.write(record);
                report.accepted += 1;
            }
            Err(e) => {
                warn!(line = line_no, error = %format!("{e:#}"), "skipping record");
                report.rejected += 1;
            }
        }
    }

    let outcome = sink.flush().await;
    report.written = outcome.written;
    report.buffered = outcome.buffered;
    info!(
        accepted = report.accepted,
        rejected = report.rejected,
        "ingest finished"
    );
    Ok(report)
}

// ========== Queries ==========

async fn cmd_search(
    manager: &ExecutionManager,
    query: &str,
    filters: &SearchFilters,
    limit: usize,
) -> Result<()> {
    let hits = manager.search_logs(query, filters, limit).await?;
    if hits.is_empty() {
        println!("No matching records");
        return Ok(());
    }

    for hit in &hits {
        println!(
            "{} [{:<8}] {:.3} {} ({})",
            hit.event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            hit.event.level,
            hit.score,
            hit.event.message,
            hit.event.execution_id
        );
    }
    Ok(())
}

async fn cmd_graph(
    manager: &ExecutionManager,
    execution_id: &str,
    edge_type: Option<EdgeType>,
) -> Result<()> {
    let graph = manager.build_execution_graph(execution_id).await?;
    match edge_type {
        Some(edge_type) => {
            let edges: Vec<_> = graph.edges_of_type(edge_type).collect();
            print_json(&edges)
        }
        None => print_json(&graph),
    }
}

async fn cmd_memory(manager: &ExecutionManager, action: MemoryAction) -> Result<()> {
    let memory = manager.memory();
    match action {
        MemoryAction::Add {
            content,
            learning_type,
            metadata,
        } => {
            let metadata = match metadata {
                Some(raw) => parse_object(&raw, "--metadata")?,
                None => Map::new(),
            };
            let learning = memory.add(&content, &learning_type, metadata).await?;
            println!("Stored learning {}", learning.id);
            Ok(())
        }
        MemoryAction::Search {
            query,
            learning_type,
            limit,
        } => {
            let hits = memory.search(&query, learning_type.as_deref(), limit).await?;
            for hit in &hits {
                println!(
                    "{:.2}  [{}] {}",
                    hit.score, hit.learning.learning_type, hit.learning.content
                );
            }
            Ok(())
        }
        MemoryAction::Recent {
            learning_type,
            limit,
        } => print_json(&memory.recent(learning_type.as_deref(), limit).await?),
        MemoryAction::Stats { learning_type } => {
            print_json(&memory.stats(learning_type.as_deref()).await?)
        }
    }
}

// ========== Buffer ==========

async fn cmd_buffer_status(config: &SinkConfig) -> Result<()> {
    let buffer = logbook_core::DiskBuffer::new(config.buffer_dir.clone());
    let pending = buffer.pending_files().await?;
    let quarantined = buffer.quarantined_files().await?;
    let size = buffer.total_size().await?;

    println!("Buffer:      {}", config.buffer_dir.display());
    println!("Pending:     {} files", pending.len());
    println!("Quarantined: {} files", quarantined.len());
    println!(
        "Size:        {} bytes (quota {} bytes)",
        size,
        config.max_buffer_bytes()
    );
    for path in &pending {
        println!("  {}", display_name(path));
    }
    Ok(())
}

async fn cmd_buffer_replay(
    handle: &SurrealHandle,
    config: SinkConfig,
    restore_quarantined: bool,
) -> Result<()> {
    let sink = LogSink::start(config, Arc::new(handle.clone()))
        .await
        .context("Failed to start log sink")?;

    if restore_quarantined {
        let restored = sink.restore_quarantined().await?;
        println!("Restored {} quarantined files", restored);
    }
    let report = sink.replay_buffered().await;
    sink.stop().await;
    print_json(&report)
}

// ========== Helpers ==========

fn parse_object(raw: &str, flag: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context(format!("{flag} is not valid JSON"))? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("{flag} must be a JSON object")),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbook_core::RunStatus;
    use logbook_store::new_isolated_database;
    use serde_json::json;
    use std::time::Duration;

    fn sink_config(dir: &Path) -> SinkConfig {
        SinkConfig::default()
            .with_buffer_dir(dir)
            .with_batching(50, Duration::from_millis(100))
            .with_retry(1, Duration::from_millis(1), Duration::from_millis(1))
            .with_monitoring(false, Duration::from_secs(60))
    }

    #[test]
    fn test_cli_parses_error_pattern_window() {
        let cli = Cli::try_parse_from(["logbook", "errors", "--since", "7d", "--min-occurrences", "3"])
            .unwrap();
        match cli.command {
            Commands::Errors {
                since,
                all_time,
                min_occurrences,
            } => {
                assert_eq!(since, chrono::Duration::days(7));
                assert!(!all_time);
                assert_eq!(min_occurrences, 3);
            }
            _ => panic!("expected errors"),
        }

        let cli = Cli::try_parse_from(["logbook", "errors"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Errors { since, .. } if since == chrono::Duration::hours(24)
        ));
        assert!(Cli::try_parse_from(["logbook", "errors", "--since", "soon"]).is_err());
    }

    #[test]
    fn test_cli_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "logbook", "search", "timeout", "--level", "warn", "--tag", "net", "--tag", "db",
            "-n", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Search {
                query,
                level,
                tag,
                limit,
                ..
            } => {
                assert_eq!(query, "timeout");
                assert_eq!(level, Some(LogLevel::Warning));
                assert_eq!(tag, vec!["net", "db"]);
                assert_eq!(limit, 3);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_level() {
        assert!(Cli::try_parse_from(["logbook", "search", "--level", "loud"]).is_err());
    }

    #[test]
    fn test_parse_line_applies_defaults() {
        let defaults = IngestDefaults {
            execution: Some("exec-1".into()),
            script: Some("etl".into()),
        };
        let record = parse_line(
            r#"{"level":"warning","message":"slow","tags":["db"],"extra_data":{"ms":900}}"#,
            &defaults,
        )
        .unwrap();
        assert_eq!(record.level, LogLevel::Warning);
        assert_eq!(record.execution_id.as_deref(), Some("exec-1"));
        assert_eq!(record.script_name.as_deref(), Some("etl"));
        assert!(record.tags.contains("db"));
        assert_eq!(record.extra_data.get("ms"), Some(&json!(900)));

        let own = parse_line(r#"{"message":"hi","execution_id":"mine"}"#, &defaults).unwrap();
        assert_eq!(own.level, LogLevel::Info);
        assert_eq!(own.execution_id.as_deref(), Some("mine"));
    }

    #[test]
    fn test_parse_line_rejects_bad_input() {
        let defaults = IngestDefaults::default();
        assert!(parse_line("not json", &defaults).is_err());
        assert!(parse_line(r#"{"level":"LOUD","message":"x"}"#, &defaults).is_err());
        assert!(parse_line(r#"{"level":"INFO"}"#, &defaults).is_err());
    }

    #[test]
    fn test_parse_object_requires_object() {
        assert_eq!(parse_object(r#"{"a":1}"#, "--x").unwrap().len(), 1);
        assert!(parse_object("[1]", "--x").is_err());
        assert!(parse_object("{", "--x").is_err());
    }

    #[tokio::test]
    async fn test_ingest_writes_valid_lines() {
        let db = new_isolated_database(&DbConfig::default()).await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let handle = db.handle().clone();
        let sink = LogSink::start(sink_config(tmp.path()), Arc::new(handle.clone()))
            .await
            .unwrap();

        let input = concat!(
            r#"{"level":"INFO","message":"one","execution_id":"exec-ingest"}"#,
            "\n\n",
            "garbage\n",
            r#"{"level":"ERROR","message":"two","execution_id":"exec-ingest"}"#,
            "\n",
        );
        let report = ingest(&sink, input.as_bytes(), &IngestDefaults::default())
            .await
            .unwrap();
        assert_eq!(
            report,
            IngestReport {
                accepted: 2,
                rejected: 1,
                written: 2,
                buffered: 0,
            }
        );
        assert_eq!(handle.count_events(Some("exec-ingest")).await.unwrap(), 2);

        sink.stop().await;
        db.drop_database().await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_without_criteria_is_an_error() {
        let db = new_isolated_database(&DbConfig::default()).await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let handle = db.handle().clone();
        let sink = LogSink::start(sink_config(tmp.path()), Arc::new(handle.clone()))
            .await
            .unwrap();
        let manager = ExecutionManager::new(handle, sink.clone());

        let ctx = manager.start_run("cli", Map::new()).await.unwrap();
        manager
            .end_run(ctx.execution_id(), RunStatus::Success, None)
            .await
            .unwrap();

        let err = run_command(
            &manager,
            Commands::Prune {
                older_than_days: None,
                execution: Vec::new(),
                dry_run: true,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("nothing to prune"));

        run_command(
            &manager,
            Commands::Prune {
                older_than_days: None,
                execution: vec![ctx.execution_id().to_string()],
                dry_run: false,
            },
        )
        .await
        .unwrap();
        assert!(manager.handle().get_run(ctx.execution_id()).await.unwrap().is_none());

        sink.stop().await;
        db.drop_database().await.unwrap();
    }
}
