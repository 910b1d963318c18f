//! SQLite-backed store: `agents` and `agent_state_history` tables.
//!
//! The checkpoint document is stored alongside the queryable columns;
//! every save and every transition record runs in a single transaction
//! so the agent row and its history row move together.

use crate::checkpoint::{AgentCheckpoint, migrate};
use crate::store::CheckpointStore;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use warden_core::error::StoreError;
use warden_core::identifiers::AgentId;
use warden_core::lifecycle::{AgentEvent, AgentState, StateTransition, TransitionStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agents (
    id              TEXT PRIMARY KEY,
    state           TEXT NOT NULL,
    manifest_json   TEXT NOT NULL,
    checkpoint_json TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS agent_state_history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id   TEXT NOT NULL,
    from_state TEXT NOT NULL,
    to_state   TEXT NOT NULL,
    event      TEXT NOT NULL,
    reason     TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_agent ON agent_state_history (agent_id, created_at);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(backend_error)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn backend_error(e: rusqlite::Error) -> StoreError {
    StoreError::Backend {
        details: e.to_string(),
    }
}

impl CheckpointStore for SqliteStore {
    fn save(&self, id: &AgentId, checkpoint: &AgentCheckpoint) -> Result<(), StoreError> {
        let document =
            serde_json::to_string(checkpoint).map_err(|e| StoreError::Serialization {
                details: e.to_string(),
            })?;
        let manifest =
            serde_json::to_string(&checkpoint.manifest).map_err(|e| StoreError::Serialization {
                details: e.to_string(),
            })?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(backend_error)?;
        tx.execute(
            "INSERT INTO agents (id, state, manifest_json, checkpoint_json, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET \
               state = excluded.state, \
               manifest_json = excluded.manifest_json, \
               checkpoint_json = excluded.checkpoint_json, \
               updated_at = excluded.updated_at",
            params![
                id.as_str(),
                checkpoint.state.as_str(),
                manifest,
                document,
                checkpoint.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(backend_error)?;
        tx.commit().map_err(backend_error)
    }

    fn load(&self, id: &AgentId) -> Result<AgentCheckpoint, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT checkpoint_json FROM agents WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_error)?;
        let raw = raw.ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let document: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                details: e.to_string(),
            })?;
        migrate(document)
    }

    fn delete(&self, id: &AgentId) -> Result<(), StoreError> {
        // `agent_state_history` stays: the transition log is
        // append-only.
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM agents WHERE id = ?1", params![id.as_str()])
            .map_err(backend_error)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<AgentId>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut statement = conn
            .prepare("SELECT id FROM agents ORDER BY id")
            .map_err(backend_error)?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend_error)?;
        let mut ids = Vec::new();
        for row in rows {
            let raw = row.map_err(backend_error)?;
            let id = AgentId::parse(&raw).map_err(|e| StoreError::Corrupt {
                id: raw.clone(),
                details: e.to_string(),
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn exists(&self, id: &AgentId) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM agents WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_error)?;
        Ok(found.is_some())
    }
}

impl TransitionStore for SqliteStore {
    fn record(
        &self,
        agent_id: &AgentId,
        state: AgentState,
        transition: &StateTransition,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(backend_error)?;
        let now = Utc::now().to_rfc3339();
        // The agent row may not exist yet when the first transition
        // lands before the first checkpoint.
        tx.execute(
            "INSERT INTO agents (id, state, manifest_json, created_at, updated_at) \
             VALUES (?1, ?2, '{}', ?3, ?3) \
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![agent_id.as_str(), state.as_str(), now],
        )
        .map_err(backend_error)?;
        tx.execute(
            "INSERT INTO agent_state_history (agent_id, from_state, to_state, event, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                agent_id.as_str(),
                transition.from.as_str(),
                transition.to.as_str(),
                transition.event.as_str(),
                transition.reason,
                transition.timestamp.to_rfc3339(),
            ],
        )
        .map_err(backend_error)?;
        tx.commit().map_err(backend_error)
    }

    fn history(
        &self,
        agent_id: &AgentId,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StateTransition>, StoreError> {
        let conn = self.conn.lock().unwrap();
        // Newest first under the limit, flipped to chronological below.
        let mut statement = conn
            .prepare(
                "SELECT from_state, to_state, event, reason, created_at \
                 FROM agent_state_history WHERE agent_id = ?1 \
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(backend_error)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = statement
            .query_map(params![agent_id.as_str(), limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(backend_error)?;

        let mut transitions = Vec::new();
        for row in rows {
            let (from, to, event, reason, created_at) = row.map_err(backend_error)?;
            let transition = StateTransition {
                from: AgentState::parse(&from).ok_or_else(|| corrupt(agent_id, &from))?,
                to: AgentState::parse(&to).ok_or_else(|| corrupt(agent_id, &to))?,
                event: AgentEvent::parse(&event).ok_or_else(|| corrupt(agent_id, &event))?,
                timestamp: DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| StoreError::Corrupt {
                        id: agent_id.to_string(),
                        details: format!("bad timestamp '{created_at}': {e}"),
                    })?
                    .with_timezone(&Utc),
                reason,
            };
            transitions.push(transition);
        }
        transitions.reverse();
        if let Some(since) = since {
            transitions.retain(|t| t.timestamp >= since);
        }
        Ok(transitions)
    }
}

fn corrupt(agent_id: &AgentId, token: &str) -> StoreError {
    StoreError::Corrupt {
        id: agent_id.to_string(),
        details: format!("unknown state or event '{token}'"),
    }
}
