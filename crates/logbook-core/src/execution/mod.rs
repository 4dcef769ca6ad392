//! Execution manager: run bookkeeping and per-execution analysis.
//!
//! A run is opened with [`ExecutionManager::start_run`] or, more usually,
//! wrapped in [`ExecutionManager::run_execution`], which closes the run as
//! `success` or `failed` whatever way the scope exits. Afterwards the same
//! manager builds the causality graph, the summary, or prunes the data.

mod context;
mod graph;
mod retention;
mod summary;

pub use context::{ExecutionContext, AGENT_LEARNING_TYPE};
pub use graph::{ExecutionGraph, GraphEdge, GraphMetadata, GraphNode, LABEL_CHARS};
pub use retention::{PruneCriteria, PruneReport};
pub use summary::{ErrorEntry, ExecutionSummary, SUMMARY_ERROR_LIMIT};

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures::FutureExt;
use logbook_store::{AgentLearning, RunStatus, ScriptRun, StoreError, SurrealHandle};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::error::{LogbookError, Result};
use crate::memory::MemoryService;
use crate::obs;
use crate::relationships::RelationshipExtractor;
use crate::search::{SearchFilters, SearchHit, SearchService};
use crate::sink::{LogRecord, LogSink};

/// Longest error text stored on a failed run, in characters.
pub const MAX_ERROR_CHARS: usize = 1000;

/// Execution id used for learnings recorded outside any execution.
pub const MANUAL_EXECUTION: &str = "manual";

/// `<script>_<YYYYmmdd_HHMMSS>_<8 hex>`
pub fn generate_execution_id(script_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        script_name,
        Utc::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn map_run_error(err: StoreError) -> LogbookError {
    match err {
        StoreError::RunNotFound { execution_id } => LogbookError::ExecutionNotFound { execution_id },
        StoreError::RunNotRunning {
            execution_id,
            status,
        } => LogbookError::InvalidRunState {
            execution_id,
            status,
        },
        other => LogbookError::Store(other),
    }
}

/// Front door over the sink and the query services.
#[derive(Debug, Clone)]
pub struct ExecutionManager {
    handle: SurrealHandle,
    sink: LogSink,
    search: SearchService,
    relationships: RelationshipExtractor,
    memory: MemoryService,
}

impl ExecutionManager {
    pub fn new(handle: SurrealHandle, sink: LogSink) -> Self {
        Self {
            search: SearchService::new(handle.clone()),
            relationships: RelationshipExtractor::new(handle.clone()),
            memory: MemoryService::new(handle.clone()),
            handle,
            sink,
        }
    }

    pub fn handle(&self) -> &SurrealHandle {
        &self.handle
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn search(&self) -> &SearchService {
        &self.search
    }

    pub fn relationships(&self) -> &RelationshipExtractor {
        &self.relationships
    }

    pub fn memory(&self) -> &MemoryService {
        &self.memory
    }

    // ========== Run Lifecycle ==========

    /// Record a new `running` run and hand back its context.
    #[instrument(skip(self, metadata))]
    pub async fn start_run(
        &self,
        script_name: &str,
        metadata: Map<String, Value>,
    ) -> Result<ExecutionContext> {
        let execution_id = generate_execution_id(script_name);
        self.handle
            .create_run(&ScriptRun::start(&execution_id, script_name, metadata))
            .await?;
        obs::emit_run_started(&execution_id, script_name);

        Ok(ExecutionContext::new(
            execution_id,
            script_name.to_string(),
            self.sink.clone(),
            self.memory.clone(),
        ))
    }

    /// Close a `running` run. Error text is cut to [`MAX_ERROR_CHARS`].
    ///
    /// `status` must be terminal; closing a run as `running` is rejected
    /// with [`LogbookError::InvalidArgument`] and leaves the run untouched.
    #[instrument(skip(self, error))]
    pub async fn end_run(
        &self,
        execution_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<ScriptRun> {
        if status == RunStatus::Running {
            return Err(LogbookError::InvalidArgument(format!(
                "cannot close execution {} as running",
                execution_id
            )));
        }
        let error = error.map(|e| truncate_chars(e, MAX_ERROR_CHARS));
        let run = self
            .handle
            .finish_run(execution_id, status, error)
            .await
            .map_err(map_run_error)?;

        let duration_ms = run
            .duration_seconds
            .map(|s| (s * 1000.0).max(0.0) as u64)
            .unwrap_or(0);
        obs::emit_run_finished(execution_id, duration_ms, status == RunStatus::Success);
        Ok(run)
    }

    async fn close_run(&self, ctx: &ExecutionContext, status: RunStatus, error: Option<&str>) {
        if let Err(err) = self.end_run(ctx.execution_id(), status, error).await {
            obs::emit_run_finalize_error(ctx.execution_id(), &err);
        }
    }

    /// Run `body` as one execution.
    ///
    /// The run is marked `success` when the body returns `Ok`, and `failed`
    /// with the error text when it returns `Err` or panics. The body's
    /// result is returned unchanged and panics are resumed after the run
    /// is closed. Only a failure to open the run surfaces as `E::from`.
    pub async fn run_execution<F, Fut, T, E>(
        &self,
        script_name: &str,
        metadata: Map<String, Value>,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display + From<LogbookError>,
    {
        let ctx = self.start_run(script_name, metadata).await.map_err(E::from)?;
        let scope = body(ctx.clone()).instrument(ctx.span().clone());

        match AssertUnwindSafe(scope).catch_unwind().await {
            Ok(Ok(value)) => {
                self.close_run(&ctx, RunStatus::Success, None).await;
                Ok(value)
            }
            Ok(Err(err)) => {
                let text = err.to_string();
                ctx.write(LogRecord::error(format!(
                    "Script {} failed with error: {}",
                    script_name, text
                )));
                self.close_run(&ctx, RunStatus::Failed, Some(&text)).await;
                Err(err)
            }
            Err(payload) => {
                let text = panic_message(payload.as_ref());
                ctx.write(LogRecord::critical(format!(
                    "Script {} panicked: {}",
                    script_name, text
                )));
                self.close_run(&ctx, RunStatus::Failed, Some(&text)).await;
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Record a learning outside a context; unscoped learnings go under
    /// [`MANUAL_EXECUTION`].
    pub async fn log_agent_learning(
        &self,
        execution_id: Option<&str>,
        message: &str,
        function_name: &str,
        context: Map<String, Value>,
        confidence: f64,
    ) -> Result<AgentLearning> {
        let metadata = context::learning_metadata(
            execution_id.unwrap_or(MANUAL_EXECUTION),
            function_name,
            context,
            confidence,
        );
        let learning = self
            .memory
            .add(message, AGENT_LEARNING_TYPE, metadata)
            .await?;
        info!(learning = %truncate_chars(message, 100), "recorded agent learning");
        Ok(learning)
    }

    // ========== Queries ==========

    pub async fn search_logs(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.search.search(query, filters, limit).await
    }

    /// Newest `extra_data.response` a script logged.
    pub async fn latest_response(
        &self,
        script_name: &str,
        execution_id: Option<&str>,
    ) -> Result<Option<Value>> {
        Ok(self.handle.latest_response(script_name, execution_id).await?)
    }

    /// Nodes for every event in timestamp order; edges from the
    /// relationship rules over each consecutive pair, persisted as they go.
    #[instrument(skip(self))]
    pub async fn build_execution_graph(&self, execution_id: &str) -> Result<ExecutionGraph> {
        let events = self.handle.events_for_execution(execution_id).await?;
        let nodes: Vec<GraphNode> = events.iter().map(graph::node_for).collect();

        let mut context = Map::new();
        context.insert("execution_id".into(), Value::String(execution_id.to_string()));

        let mut edges = Vec::new();
        let mut edge_errors = 0;
        for pair in events.windows(2) {
            let outcome = self.relationships.extract(&pair[0], &pair[1], &context).await;
            edge_errors += outcome.errors.len();
            edges.extend(outcome.edges.into_iter().map(GraphEdge::from));
        }
        if edge_errors > 0 {
            warn!(edge_errors, "some relationships could not be stored");
        }

        Ok(ExecutionGraph {
            metadata: GraphMetadata {
                execution_id: execution_id.to_string(),
                total_logs: nodes.len(),
                total_edges: edges.len(),
                edge_errors,
            },
            nodes,
            edges,
        })
    }

    #[instrument(skip(self))]
    pub async fn summary(&self, execution_id: &str) -> Result<ExecutionSummary> {
        let run_info = self
            .handle
            .get_run(execution_id)
            .await?
            .ok_or_else(|| LogbookError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })?;
        let log_statistics = self.handle.level_counts(execution_id).await?;
        let errors = self
            .handle
            .recent_errors(execution_id, SUMMARY_ERROR_LIMIT)
            .await?
            .into_iter()
            .map(ErrorEntry::from)
            .collect();
        let learnings = self.memory.for_execution(execution_id).await?;

        Ok(ExecutionSummary {
            execution_id: execution_id.to_string(),
            total_logs: log_statistics.values().sum(),
            run_info,
            log_statistics,
            errors,
            learnings,
        })
    }

    /// Delete (or with `dry_run`, only count) matching records in every table.
    #[instrument(skip(self))]
    pub async fn prune(&self, criteria: &PruneCriteria, dry_run: bool) -> Result<PruneReport> {
        let filter = criteria.to_filter(Utc::now());
        if filter.is_empty() {
            warn!("no pruning criteria given, nothing pruned");
            return Ok(PruneReport {
                dry_run,
                applied: false,
                counts: Default::default(),
            });
        }

        let counts = self.handle.prune(&filter, dry_run).await?;
        info!(
            dry_run,
            examined = counts.total_examined(),
            deleted = counts.total_deleted(),
            "prune finished"
        );
        Ok(PruneReport {
            dry_run,
            applied: true,
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_execution_id_shape() {
        let id = generate_execution_id("etl");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "etl");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars(&"a".repeat(1500), MAX_ERROR_CHARS).len(), 1000);
        assert_eq!(truncate_chars("short", MAX_ERROR_CHARS), "short");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    #[test]
    fn test_map_run_error() {
        let err = map_run_error(StoreError::RunNotFound {
            execution_id: "x".into(),
        });
        assert!(matches!(err, LogbookError::ExecutionNotFound { .. }));
        let err = map_run_error(StoreError::RunNotRunning {
            execution_id: "x".into(),
            status: "success".into(),
        });
        assert!(matches!(err, LogbookError::InvalidRunState { .. }));
    }
}
