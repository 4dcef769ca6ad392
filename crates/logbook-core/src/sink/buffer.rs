//! Disk buffer for batches the store would not take.
//!
//! One JSON-lines file per failed batch, named
//! `buffer_<YYYYmmdd_HHMMSS_nnnnnnnnn>.jsonl` so lexical order is creation
//! order. Files that cannot be replayed move to the `_failed/` sibling and
//! stay there until an operator restores them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use logbook_store::LogEvent;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{LogbookError, Result};

/// Name of the quarantine directory inside the buffer directory.
pub const QUARANTINE_DIR: &str = "_failed";

const BUFFER_PREFIX: &str = "buffer_";
const BUFFER_EXT: &str = "jsonl";

/// Share of the quota the guard trims down to.
const QUOTA_TARGET_RATIO: f64 = 0.8;

/// Result of one quota check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaOutcome {
    pub before_bytes: u64,
    pub after_bytes: u64,
    pub removed: Vec<PathBuf>,
}

impl QuotaOutcome {
    pub fn trimmed(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Handle on a buffer directory.
#[derive(Debug, Clone)]
pub struct DiskBuffer {
    dir: PathBuf,
    quarantine_dir: PathBuf,
}

impl DiskBuffer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let quarantine_dir = dir.join(QUARANTINE_DIR);
        Self {
            dir,
            quarantine_dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    /// Create the buffer and quarantine directories if missing.
    pub async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.quarantine_dir).await?;
        Ok(())
    }

    /// Persist a batch as a new buffer file.
    ///
    /// The file is written under a temporary name and renamed into place,
    /// so a concurrent replay never sees a half-written file.
    pub async fn write_batch(&self, events: &[LogEvent]) -> Result<PathBuf> {
        self.ensure_dirs().await?;

        let mut body = Vec::with_capacity(events.len() * 256);
        for event in events {
            serde_json::to_writer(&mut body, event)?;
            body.push(b'\n');
        }

        loop {
            let name = format!(
                "{BUFFER_PREFIX}{}.{BUFFER_EXT}",
                Utc::now().format("%Y%m%d_%H%M%S_%f")
            );
            let path = self.dir.join(&name);
            let staging = self.dir.join(format!(".{name}.tmp"));

            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staging)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);

            if fs::try_exists(&path).await? {
                fs::remove_file(&staging).await?;
                continue;
            }
            fs::rename(&staging, &path).await?;
            debug!(path = %path.display(), records = events.len(), "batch written to disk buffer");
            return Ok(path);
        }
    }

    /// Buffer files waiting for replay, oldest first.
    pub async fn pending_files(&self) -> Result<Vec<PathBuf>> {
        list_buffer_files(&self.dir).await
    }

    /// Files sitting in quarantine, oldest first.
    pub async fn quarantined_files(&self) -> Result<Vec<PathBuf>> {
        list_buffer_files(&self.quarantine_dir).await
    }

    /// Parse a buffer file. Any malformed line fails the whole file.
    pub async fn read_file(&self, path: &Path) -> Result<Vec<LogEvent>> {
        let raw = fs::read_to_string(path).await?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<LogEvent>(line).map_err(LogbookError::from))
            .collect()
    }

    pub async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a file into `_failed/`, returning its new location.
    pub async fn quarantine(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.quarantine_dir).await?;
        let name = path
            .file_name()
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "buffer path has no file name"))?;
        let target = self.quarantine_dir.join(name);
        fs::rename(path, &target).await?;
        warn!(path = %target.display(), "buffer file quarantined");
        Ok(target)
    }

    /// Move every quarantined file back into the replay queue.
    pub async fn restore_quarantined(&self) -> Result<usize> {
        let files = self.quarantined_files().await?;
        for path in &files {
            if let Some(name) = path.file_name() {
                fs::rename(path, self.dir.join(name)).await?;
            }
        }
        Ok(files.len())
    }

    /// Bytes held by pending buffer files; quarantine excluded.
    pub async fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.pending_files().await? {
            total += file_len(&path).await?;
        }
        Ok(total)
    }

    pub async fn enforce_quota(&self, max_bytes: u64) -> Result<QuotaOutcome> {
        enforce_quota(&self.dir, max_bytes).await
    }
}

fn is_buffer_file(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(BUFFER_PREFIX))
        .unwrap_or(false);
    named && path.extension().and_then(|e| e.to_str()) == Some(BUFFER_EXT)
}

async fn list_buffer_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_buffer_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Keep the buffer directory under its quota.
///
/// When pending files exceed `max_bytes`, the oldest are deleted until the
/// total is at or below 80 % of the quota. Quarantined files do not count.
pub async fn enforce_quota(dir: &Path, max_bytes: u64) -> Result<QuotaOutcome> {
    let files = list_buffer_files(dir).await?;
    let mut sized = Vec::with_capacity(files.len());
    let mut total = 0u64;
    for path in files {
        let len = file_len(&path).await?;
        total += len;
        sized.push((path, len));
    }

    let mut outcome = QuotaOutcome {
        before_bytes: total,
        after_bytes: total,
        removed: Vec::new(),
    };
    if total <= max_bytes {
        return Ok(outcome);
    }

    let target = (max_bytes as f64 * QUOTA_TARGET_RATIO) as u64;
    for (path, len) in sized {
        if outcome.after_bytes <= target {
            break;
        }
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        outcome.after_bytes -= len;
        outcome.removed.push(path);
    }

    warn!(
        before_bytes = outcome.before_bytes,
        after_bytes = outcome.after_bytes,
        removed = outcome.removed.len(),
        "disk buffer over quota, oldest files deleted"
    );
    Ok(outcome)
}
