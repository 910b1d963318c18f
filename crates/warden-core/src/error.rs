//! The runtime error taxonomy.
//!
//! Denial-shaped errors (`PermissionDenied`, `PolicyBlocked`,
//! `RateLimited`, `ApprovalRequired`) are structured responses surfaced
//! to callers and logged at `warn`; they never crash the runtime.
//! `Storage` failures are retried by the owning component and escalate
//! the affected agent to `error`; `Internal` is logged at `critical` and
//! quarantines only the owning agent.

use crate::identifiers::GrantId;

/// Errors produced by the persistence seam (checkpoint and transition
/// stores). Backend-specific causes are flattened to structured detail
/// strings so callers stay backend-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("I/O failure on {path}: {details}")]
    Io { path: String, details: String },

    #[error("serialization failure: {details}")]
    Serialization { details: String },

    #[error("storage backend failure: {details}")]
    Backend { details: String },

    #[error("checkpoint version {found} is newer than supported version {supported}")]
    VersionTooNew { found: u32, supported: u32 },

    #[error("stored data for '{id}' is corrupt: {details}")]
    Corrupt { id: String, details: String },

    #[error("no stored entry for '{id}'")]
    NotFound { id: String },
}

/// Top-level error taxonomy for runtime operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WardenError {
    #[error("cannot {operation} while in state '{current}'")]
    InvalidState { current: String, operation: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("permission denied for {capability}: {reason}")]
    PermissionDenied { capability: String, reason: String },

    #[error("blocked by policy: {reason}")]
    PolicyBlocked {
        reason: String,
        rule_id: Option<String>,
    },

    #[error("approval required for {capability} {operation} on {subject}")]
    ApprovalRequired {
        capability: String,
        operation: String,
        subject: String,
    },

    #[error("rate limited on {bucket}")]
    RateLimited {
        bucket: String,
        retry_after_ms: Option<u64>,
    },

    #[error("resource '{resource}' exceeded: used {used} of {limit}")]
    ResourceExceeded {
        resource: String,
        used: u64,
        limit: u64,
    },

    #[error("timed out after {after_ms}ms ({source_tag})")]
    Timeout { source_tag: String, after_ms: u64 },

    #[error("cancelled ({source_tag})")]
    Cancelled { source_tag: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl WardenError {
    /// Whether this error is a structured denial rather than a fault.
    ///
    /// Denials are normal control flow: they carry a human-readable
    /// reason (and the matched rule id where applicable) back to the
    /// caller.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            WardenError::PermissionDenied { .. }
                | WardenError::PolicyBlocked { .. }
                | WardenError::ApprovalRequired { .. }
                | WardenError::RateLimited { .. }
        )
    }

    /// Whether the current operation was abandoned without faulting the
    /// agent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WardenError::Cancelled { .. } | WardenError::Timeout { .. }
        )
    }

    /// Convenience constructor for grant-shaped denials.
    pub fn denied_by_grant(capability: impl Into<String>, grant: Option<GrantId>) -> Self {
        let reason = match grant {
            Some(id) => format!("grant {id} does not cover the requested scope"),
            None => "no active grant".to_string(),
        };
        WardenError::PermissionDenied {
            capability: capability.into(),
            reason,
        }
    }
}

/// Result alias used across the workspace.
pub type WardenResult<T> = Result<T, WardenError>;
