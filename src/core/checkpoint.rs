//! Durable checkpoint store for crash recovery.
//!
//! The whole state lives in `<out_dir>/checkpoint.json` and is rewritten after
//! mutations. With `flush_every > 1` item-level mutations are batched; phase
//! changes and explicit [`CheckpointStore::flush`] calls always write.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::domain::{CheckpointState, Phase};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Errors raised by the checkpoint store
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint file is corrupt: {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Write-through (or batched) checkpoint store for one output directory
pub struct CheckpointStore {
    path: PathBuf,
    state: CheckpointState,
    flush_every: usize,
    unflushed: usize,
}

impl CheckpointStore {
    /// Load the checkpoint for an output directory.
    ///
    /// A missing file yields an empty state; an unreadable one is an error,
    /// so a stale checkpoint is never silently discarded.
    pub async fn load(out_dir: &Path, flush_every: usize) -> Result<Self, CheckpointError> {
        let path = out_dir.join(CHECKPOINT_FILE);

        let state = if path.exists() {
            let content = fs::read(&path).await?;
            serde_json::from_slice(&content).map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })?
        } else {
            CheckpointState::default()
        };

        Ok(Self {
            path,
            state,
            flush_every: flush_every.max(1),
            unflushed: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.state.is_completed(id)
    }

    pub async fn mark_completed(&mut self, id: &str) -> Result<(), CheckpointError> {
        self.state.mark_completed(id);
        self.record_mutation().await
    }

    pub async fn mark_failed(&mut self, id: &str) -> Result<(), CheckpointError> {
        self.state.mark_failed(id);
        self.record_mutation().await
    }

    /// Change phase and flush immediately
    pub async fn set_phase(&mut self, phase: Phase) -> Result<(), CheckpointError> {
        self.state.set_phase(phase);
        self.flush().await
    }

    /// Write the current state to disk
    pub async fn flush(&mut self) -> Result<(), CheckpointError> {
        let content = serde_json::to_vec_pretty(&self.state)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &self.path).await?;

        self.unflushed = 0;
        Ok(())
    }

    async fn record_mutation(&mut self) -> Result<(), CheckpointError> {
        self.unflushed += 1;
        if self.unflushed >= self.flush_every {
            self.flush().await?;
        }
        Ok(())
    }
}
