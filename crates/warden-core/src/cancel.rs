//! Cooperative cancellation for blocking operations.
//!
//! Every blocking operation in the runtime accepts a [`CancelToken`]
//! and returns a `Cancelled` error promptly when it fires. Timeouts are
//! cancellations with a source tag.

use crate::error::WardenError;
use std::time::Duration;
use tokio::sync::watch;

/// Why a token fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// Explicit cancellation (shutdown, operator action, parent task).
    Cancelled { source: String },
    /// A deadline elapsed.
    Timeout { source: String, after_ms: u64 },
}

impl CancelCause {
    pub fn to_error(&self) -> WardenError {
        match self {
            CancelCause::Cancelled { source } => WardenError::Cancelled {
                source_tag: source.clone(),
            },
            CancelCause::Timeout { source, after_ms } => WardenError::Timeout {
                source_tag: source.clone(),
                after_ms: *after_ms,
            },
        }
    }
}

/// The owning side of a cancellation channel.
pub struct CancelSource {
    tx: watch::Sender<Option<CancelCause>>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the token with an explicit cancellation.
    pub fn cancel(&self, source: impl Into<String>) {
        let _ = self.tx.send(Some(CancelCause::Cancelled {
            source: source.into(),
        }));
    }

    /// Fire the token as a timeout.
    pub fn timeout(&self, source: impl Into<String>, after: Duration) {
        let _ = self.tx.send(Some(CancelCause::Timeout {
            source: source.into(),
            after_ms: after.as_millis() as u64,
        }));
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheaply clonable handle observed by blocking operations.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<Option<CancelCause>>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        CancelSource::new().token()
    }

    /// A token that fires as a timeout after `after`, driven by a
    /// spawned timer task.
    pub fn with_timeout(source: impl Into<String>, after: Duration) -> Self {
        let cancel = CancelSource::new();
        let token = cancel.token();
        let source = source.into();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            cancel.timeout(source, after);
        });
        token
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn cause(&self) -> Option<CancelCause> {
        self.rx.borrow().clone()
    }

    /// Error-shaped view: `Err` once the token has fired.
    pub fn check(&self) -> Result<(), WardenError> {
        match self.rx.borrow().as_ref() {
            Some(cause) => Err(cause.to_error()),
            None => Ok(()),
        }
    }

    /// Wait until the token fires.
    pub async fn fired(&mut self) -> CancelCause {
        loop {
            if let Some(cause) = self.rx.borrow().clone() {
                return cause;
            }
            if self.rx.changed().await.is_err() {
                // Source dropped without firing; treat as cancellation.
                return CancelCause::Cancelled {
                    source: "cancel source dropped".to_string(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_propagates_to_all_tokens() {
        let source = CancelSource::new();
        let a = source.token();
        let b = source.token();
        source.cancel("shutdown");
        assert!(a.is_cancelled());
        assert!(matches!(
            b.check(),
            Err(WardenError::Cancelled { source_tag }) if source_tag == "shutdown"
        ));
    }

    #[test]
    fn timeout_carries_source_tag() {
        let source = CancelSource::new();
        let token = source.token();
        source.timeout("llm-call", Duration::from_secs(30));
        assert!(matches!(
            token.check(),
            Err(WardenError::Timeout { source_tag, after_ms: 30_000 }) if source_tag == "llm-call"
        ));
    }

    #[tokio::test]
    async fn fired_resolves_on_cancel() {
        let source = CancelSource::new();
        let mut token = source.token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            source.cancel("test");
        });
        let cause = token.fired().await;
        assert!(matches!(cause, CancelCause::Cancelled { .. }));
    }

    #[tokio::test]
    async fn with_timeout_fires() {
        let mut token = CancelToken::with_timeout("op", Duration::from_millis(10));
        let cause = token.fired().await;
        assert!(matches!(cause, CancelCause::Timeout { .. }));
    }
}
