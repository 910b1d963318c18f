//! SQLite sink: durable `audit_log` table.

use super::{AuditSink, SinkError};
use crate::event::{AuditEvent, Outcome};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_log (
    id            TEXT PRIMARY KEY,
    action        TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id   TEXT NOT NULL,
    actor_id      TEXT NOT NULL,
    details_json  TEXT NOT NULL,
    outcome       TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
";

/// Durable sink projecting events into an append-only `audit_log`
/// table. Redelivery of the same event id is a no-op upsert, so
/// at-least-once delivery does not duplicate rows.
pub struct SqliteSink {
    conn: Mutex<Option<Connection>>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let conn = Connection::open(path.as_ref()).map_err(|e| SinkError::Backend {
            sink: "sqlite".to_string(),
            details: e.to_string(),
        })?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory().map_err(|e| SinkError::Backend {
            sink: "sqlite".to_string(),
            details: e.to_string(),
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(SCHEMA).map_err(|e| SinkError::Backend {
            sink: "sqlite".to_string(),
            details: format!("applying schema: {e}"),
        })?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Number of stored rows, for diagnostics and tests.
    pub fn count(&self) -> Result<u64, SinkError> {
        let guard = self.conn.lock().unwrap();
        let Some(conn) = guard.as_ref() else {
            return Err(SinkError::Closed {
                sink: "sqlite".to_string(),
            });
        };
        conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(|e| SinkError::Backend {
            sink: "sqlite".to_string(),
            details: e.to_string(),
        })
    }

    /// Outcomes of the stored rows in insertion-time order, for tests.
    pub fn outcomes(&self) -> Result<Vec<Outcome>, SinkError> {
        let guard = self.conn.lock().unwrap();
        let Some(conn) = guard.as_ref() else {
            return Err(SinkError::Closed {
                sink: "sqlite".to_string(),
            });
        };
        let mut statement = conn
            .prepare("SELECT outcome FROM audit_log ORDER BY created_at, rowid")
            .map_err(|e| SinkError::Backend {
                sink: "sqlite".to_string(),
                details: e.to_string(),
            })?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| SinkError::Backend {
                sink: "sqlite".to_string(),
                details: e.to_string(),
            })?;
        let mut outcomes = Vec::new();
        for row in rows {
            let value = row.map_err(|e| SinkError::Backend {
                sink: "sqlite".to_string(),
                details: e.to_string(),
            })?;
            outcomes.push(match value.as_str() {
                "failure" => Outcome::Failure,
                "denied" => Outcome::Denied,
                "blocked" => Outcome::Blocked,
                _ => Outcome::Success,
            });
        }
        Ok(outcomes)
    }
}

impl AuditSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let record = event.to_record();
        let details = serde_json::to_string(&record.details).map_err(|e| {
            SinkError::Serialization {
                sink: "sqlite".to_string(),
                details: e.to_string(),
            }
        })?;
        let guard = self.conn.lock().unwrap();
        let Some(conn) = guard.as_ref() else {
            return Err(SinkError::Closed {
                sink: "sqlite".to_string(),
            });
        };
        conn.execute(
            "INSERT OR IGNORE INTO audit_log \
             (id, action, resource_type, resource_id, actor_id, details_json, outcome, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.id.to_string(),
                record.action,
                record.resource_type,
                record.resource_id,
                record.actor_id,
                details,
                record.outcome.as_str(),
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| SinkError::Backend {
            sink: "sqlite".to_string(),
            details: e.to_string(),
        })?;
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut guard = self.conn.lock().unwrap();
        guard.take();
        Ok(())
    }

    fn durable(&self) -> bool {
        true
    }
}
