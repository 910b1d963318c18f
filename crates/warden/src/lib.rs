//! # Warden
//!
//! Umbrella crate for the Warden agent runtime: capability sandboxing,
//! policy evaluation, resource accounting, auditing, persistence and
//! foreign-framework adapters behind one dependency.
//!
//! ```rust
//! use warden::prelude::*;
//!
//! let runtime = Runtime::builder().build();
//! let manifest = AgentManifest::new(AgentId::new_unchecked("greeter"), "greeter")
//!     .with_permissions([Capability::LlmChat].into());
//! let id = runtime.register(manifest).unwrap();
//! runtime.signal(&id, AgentEvent::Initialize, None).unwrap();
//! ```

pub use warden_adapter as adapter;
pub use warden_audit as audit;
pub use warden_core as core;
pub use warden_policy as policy;
pub use warden_runtime as runtime;
pub use warden_store as store;

/// The types most integrations need.
pub mod prelude {
    pub use warden_adapter::{
        ActionGate, Adapter, AdapterConfig, AdapterMessage, AdapterState, ResponseFrame,
        adapter_for, load_adapter_config,
    };
    pub use warden_audit::{
        AuditEvent, AuditPipeline, AuditSink, Category, ConsoleSink, FileSink, MemorySink,
        Outcome, Severity, SqliteSink,
    };
    pub use warden_core::{
        AgentContext, AgentEvent, AgentId, AgentLimits, AgentManifest, AgentState, BucketKind,
        CancelSource, CancelToken, Capability, CapabilityGrant, CapabilitySet, CheckOptions,
        GrantConstraints, RateLimiter, ResourceUsage, Sandbox, TrustLevel, WardenError,
        WardenResult,
    };
    pub use warden_policy::{
        ApprovalHandler, FileOperation, PolicyDecision, PolicyEngine, PolicyRequest, PolicyRule,
        PolicySet, PolicySetBuilder, PolicyTemplate, load_policy_file,
    };
    pub use warden_runtime::Runtime;
    pub use warden_store::{
        AgentCheckpoint, AutoCheckpointer, CheckpointStore, FileStore, InMemoryStore, SqliteStore,
    };
}
