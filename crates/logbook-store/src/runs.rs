//! `script_runs` lifecycle: start, finish, lookup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::handle::SurrealHandle;
use crate::schema::{
    record_id, surreal_datetime, surreal_datetime_opt, RunStatus, ScriptRun, SCRIPT_RUNS,
};
use crate::Result;

/// Wire row for `script_runs`; the record key is the execution id
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbScriptRun {
    execution_id: String,
    script_name: String,
    #[serde(with = "surreal_datetime")]
    start_time: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    end_time: Option<DateTime<Utc>>,
    status: String,
    #[serde(default)]
    duration_seconds: Option<f64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    pid: u32,
    hostname: String,
}

impl From<&ScriptRun> for DbScriptRun {
    fn from(run: &ScriptRun) -> Self {
        DbScriptRun {
            execution_id: run.execution_id.clone(),
            script_name: run.script_name.clone(),
            start_time: run.start_time,
            end_time: run.end_time,
            status: run.status.as_str().to_string(),
            duration_seconds: run.duration_seconds,
            error: run.error.clone(),
            metadata: run.metadata.clone(),
            pid: run.pid,
            hostname: run.hostname.clone(),
        }
    }
}

impl DbScriptRun {
    fn into_script_run(self) -> Result<ScriptRun> {
        let status = self
            .status
            .parse::<RunStatus>()
            .map_err(StoreError::Serialization)?;
        Ok(ScriptRun {
            execution_id: self.execution_id,
            script_name: self.script_name,
            start_time: self.start_time,
            end_time: self.end_time,
            status,
            duration_seconds: self.duration_seconds,
            error: self.error,
            metadata: self.metadata,
            pid: self.pid,
            hostname: self.hostname,
        })
    }
}

/// Terminal outcome written by [`SurrealHandle::finish_run`]
#[derive(Debug, Clone, Serialize)]
struct RunCompletion {
    #[serde(with = "surreal_datetime")]
    end_time: DateTime<Utc>,
    status: String,
    duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SurrealHandle {
    // ========== Script Run Operations ==========

    /// Persist a new run (normally in `running` state)
    #[instrument(skip(self, run), fields(execution_id = %run.execution_id))]
    pub async fn create_run(&self, run: &ScriptRun) -> Result<()> {
        debug!("creating script run");

        self.db
            .query("CREATE $id CONTENT $run")
            .bind(("id", record_id(SCRIPT_RUNS, &run.execution_id)))
            .bind(("run", DbScriptRun::from(run)))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    /// Fetch a run by execution id
    #[instrument(skip(self))]
    pub async fn get_run(&self, execution_id: &str) -> Result<Option<ScriptRun>> {
        let mut res = self
            .db
            .query("SELECT * FROM $id")
            .bind(("id", record_id(SCRIPT_RUNS, execution_id)))
            .await?;
        let rows: Vec<DbScriptRun> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(DbScriptRun::into_script_run)
            .transpose()
    }

    /// Move a `running` run to its terminal status.
    ///
    /// Duration is computed from the stored start time. Fails with
    /// `RunNotRunning` if the run already finished.
    #[instrument(skip(self, error))]
    pub async fn finish_run(
        &self,
        execution_id: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<ScriptRun> {
        let current = self
            .get_run(execution_id)
            .await?
            .ok_or_else(|| StoreError::RunNotFound {
                execution_id: execution_id.to_string(),
            })?;
        if current.status != RunStatus::Running {
            return Err(StoreError::RunNotRunning {
                execution_id: execution_id.to_string(),
                status: current.status.to_string(),
            });
        }

        let end_time = Utc::now();
        let duration_seconds =
            (end_time - current.start_time).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
        let completion = RunCompletion {
            end_time,
            status: status.as_str().to_string(),
            duration_seconds,
            error,
        };

        let mut res = self
            .db
            .query("UPDATE $id MERGE $completion WHERE status = 'running' RETURN AFTER")
            .bind(("id", record_id(SCRIPT_RUNS, execution_id)))
            .bind(("completion", completion))
            .await?;
        let rows: Vec<DbScriptRun> = res.take(0)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::RunNotRunning {
                execution_id: execution_id.to_string(),
                status: "finished".to_string(),
            })?;

        debug!(status = %status, duration_seconds, "script run finished");
        row.into_script_run()
    }

    /// Runs of a script, newest first
    #[instrument(skip(self))]
    pub async fn list_runs(&self, script_name: Option<&str>, limit: usize) -> Result<Vec<ScriptRun>> {
        let scope = if script_name.is_some() {
            " WHERE script_name = $script_name"
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM script_runs{} ORDER BY start_time DESC LIMIT {}",
            scope,
            limit.max(1)
        );
        let mut pending = self.db.query(sql);
        if let Some(name) = script_name {
            pending = pending.bind(("script_name", name.to_string()));
        }
        let mut res = pending.await?;
        let rows: Vec<DbScriptRun> = res.take(0)?;
        rows.into_iter().map(DbScriptRun::into_script_run).collect()
    }
}
