// src/checkpoint.rs
//! Persisted "last successful cycle" timestamp.
//!
//! Read once at cycle start, written once after the cycle completes. The run
//! lock guarantees a single reader/writer, so plain atomic file replacement is
//! enough.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{DigestError, Result};

pub const CHECKPOINT_FILE: &str = "last_run.json";

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `None` when no cycle has completed yet.
    async fn last_run_time(&self) -> Result<Option<DateTime<Utc>>>;
    async fn set_last_run_time(&self, ts: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointState {
    last_run: DateTime<Utc>,
}

/// JSON file store, written via temp file + rename.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpoint {
    path: PathBuf,
}

impl JsonFileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<state_dir>/last_run.json`
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(CHECKPOINT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        let state: CheckpointState = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(state.last_run))
    }

    async fn write(&self, ts: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let body = serde_json::to_vec_pretty(&CheckpointState { last_run: ts })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpoint {
    async fn last_run_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.read()
            .await
            .map_err(|e| DigestError::Checkpoint(format!("{e:#}")))
    }

    async fn set_last_run_time(&self, ts: DateTime<Utc>) -> Result<()> {
        self.write(ts)
            .await
            .map_err(|e| DigestError::Checkpoint(format!("{e:#}")))
    }
}

/// In-process store for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    inner: Mutex<Option<DateTime<Utc>>>,
    writes: Mutex<Vec<DateTime<Utc>>>,
}

impl MemoryCheckpoint {
    pub fn new(initial: Option<DateTime<Utc>>) -> Self {
        Self {
            inner: Mutex::new(initial),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Option<DateTime<Utc>> {
        *self.inner.lock().expect("checkpoint mutex poisoned")
    }

    /// Every value passed to `set_last_run_time`, in order.
    pub fn writes(&self) -> Vec<DateTime<Utc>> {
        self.writes.lock().expect("checkpoint mutex poisoned").clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn last_run_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.current())
    }

    async fn set_last_run_time(&self, ts: DateTime<Utc>) -> Result<()> {
        *self.inner.lock().expect("checkpoint mutex poisoned") = Some(ts);
        self.writes
            .lock()
            .expect("checkpoint mutex poisoned")
            .push(ts);
        Ok(())
    }
}
