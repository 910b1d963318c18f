//! File sink: durable JSON-lines log.

use super::{AuditSink, SinkError};
use crate::event::AuditEvent;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Durable sink appending one JSON object per line.
///
/// Appends are flushed on every pipeline flush; a failed append leaves
/// the file untouched so redelivery produces no partial lines.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SinkError::Io {
                    sink: "file".to_string(),
                    details: format!("creating {}: {e}", parent.display()),
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::Io {
                sink: "file".to_string(),
                details: format!("opening {}: {e}", path.display()),
            })?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl AuditSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(event).map_err(|e| SinkError::Serialization {
            sink: "file".to_string(),
            details: e.to_string(),
        })?;
        let mut guard = self.file.lock().unwrap();
        let Some(file) = guard.as_mut() else {
            return Err(SinkError::Closed {
                sink: "file".to_string(),
            });
        };
        writeln!(file, "{line}").map_err(|e| SinkError::Io {
            sink: "file".to_string(),
            details: format!("appending to {}: {e}", self.path.display()),
        })
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut guard = self.file.lock().unwrap();
        if let Some(file) = guard.as_mut() {
            file.flush().map_err(|e| SinkError::Io {
                sink: "file".to_string(),
                details: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut guard = self.file.lock().unwrap();
        if let Some(mut file) = guard.take() {
            file.flush().map_err(|e| SinkError::Io {
                sink: "file".to_string(),
                details: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn durable(&self) -> bool {
        true
    }
}
