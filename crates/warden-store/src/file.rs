//! File-backed store: one JSON document per agent, JSON-lines history.
//!
//! Saves write to a temporary sibling and rename into place, so a
//! reader never observes a partial checkpoint. A checkpoint that fails
//! to parse is quarantined to a `.corrupted.<ts>` sibling instead of
//! being silently overwritten.

use crate::checkpoint::{AgentCheckpoint, migrate};
use crate::store::CheckpointStore;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use warden_core::error::StoreError;
use warden_core::identifiers::AgentId;
use warden_core::lifecycle::{AgentState, StateTransition, TransitionStore};

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating directories as needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for sub in ["agents", "history"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
                path: dir.display().to_string(),
                details: e.to_string(),
            })?;
        }
        Ok(Self { root })
    }

    fn checkpoint_path(&self, id: &AgentId) -> PathBuf {
        self.root.join("agents").join(format!("{id}.json"))
    }

    fn history_path(&self, id: &AgentId) -> PathBuf {
        self.root.join("history").join(format!("{id}.jsonl"))
    }

    fn quarantine(&self, path: &Path) {
        let backup = path.with_extension(format!("corrupted.{}", Utc::now().timestamp()));
        if let Err(e) = fs::copy(path, &backup) {
            tracing::warn!(path = ?path, error = %e, "Failed to quarantine corrupt checkpoint");
        } else {
            tracing::warn!(path = ?path, backup = ?backup, "Quarantined corrupt checkpoint");
        }
    }
}

impl CheckpointStore for FileStore {
    fn save(&self, id: &AgentId, checkpoint: &AgentCheckpoint) -> Result<(), StoreError> {
        let json =
            serde_json::to_string_pretty(checkpoint).map_err(|e| StoreError::Serialization {
                details: e.to_string(),
            })?;
        let path = self.checkpoint_path(id);
        let tmp_path = path.with_extension("tmp");

        fs::write(&tmp_path, json).map_err(|e| StoreError::Io {
            path: tmp_path.display().to_string(),
            details: e.to_string(),
        })?;
        fs::rename(&tmp_path, &path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        tracing::debug!(agent_id = %id, path = ?path, "Persisted checkpoint");
        Ok(())
    }

    fn load(&self, id: &AgentId) -> Result<AgentCheckpoint, StoreError> {
        let path = self.checkpoint_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id: id.to_string() });
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    details: e.to_string(),
                });
            }
        };
        let document: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(document) => document,
            Err(e) => {
                self.quarantine(&path);
                return Err(StoreError::Corrupt {
                    id: id.to_string(),
                    details: e.to_string(),
                });
            }
        };
        migrate(document)
    }

    fn delete(&self, id: &AgentId) -> Result<(), StoreError> {
        // History stays: the transition log is append-only.
        let path = self.checkpoint_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                details: e.to_string(),
            }),
        }
    }

    fn list(&self) -> Result<Vec<AgentId>, StoreError> {
        let dir = self.root.join("agents");
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::Io {
            path: dir.display().to_string(),
            details: e.to_string(),
        })?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = AgentId::parse(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn exists(&self, id: &AgentId) -> Result<bool, StoreError> {
        Ok(self.checkpoint_path(id).is_file())
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct HistoryRow {
    state: AgentState,
    #[serde(flatten)]
    transition: StateTransition,
}

impl TransitionStore for FileStore {
    fn record(
        &self,
        agent_id: &AgentId,
        state: AgentState,
        transition: &StateTransition,
    ) -> Result<(), StoreError> {
        let path = self.history_path(agent_id);
        let row = HistoryRow {
            state,
            transition: transition.clone(),
        };
        let line = serde_json::to_string(&row).map_err(|e| StoreError::Serialization {
            details: e.to_string(),
        })?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                details: e.to_string(),
            })?;
        writeln!(file, "{line}").map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(())
    }

    fn history(
        &self,
        agent_id: &AgentId,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StateTransition>, StoreError> {
        let path = self.history_path(agent_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    details: e.to_string(),
                });
            }
        };
        let mut rows = Vec::new();
        for line in raw.lines() {
            let row: HistoryRow =
                serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                    id: agent_id.to_string(),
                    details: format!("bad history line: {e}"),
                })?;
            rows.push(row.transition);
        }
        if let Some(since) = since {
            rows.retain(|t| t.timestamp >= since);
        }
        if let Some(limit) = limit {
            let skip = rows.len().saturating_sub(limit);
            rows.drain(..skip);
        }
        Ok(rows)
    }
}
