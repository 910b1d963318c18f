//! # Warden Core
//!
//! Core types and enforcement primitives for the Warden agent runtime:
//! validated identifiers, the capability vocabulary, the per-agent
//! lifecycle state machine, the capability sandbox and the token-bucket
//! rate limiter.

pub mod cancel;
pub mod capability;
pub mod context;
pub mod error;
pub mod hosts;
pub mod identifiers;
pub mod lifecycle;
pub mod manifest;
pub mod pattern;
pub mod ratelimit;
pub mod sandbox;

pub use cancel::{CancelCause, CancelSource, CancelToken};
pub use capability::{Capability, CapabilityParseError, CapabilitySet};
pub use context::{AgentContext, ResourceUsage};
pub use error::{StoreError, WardenError, WardenResult};
pub use identifiers::{AgentId, GrantId, IdValidationError, TraceId};
pub use lifecycle::{
    AgentEvent, AgentState, LifecycleMachine, StateTransition, TransitionStore,
};
pub use manifest::{AgentLimits, AgentManifest, TrustLevel};
pub use ratelimit::{BucketConfig, BucketKind, ConsumeOutcome, RateLimiter};
pub use sandbox::{
    CapabilityGrant, CheckOptions, GrantConstraints, GrantRegistry, Sandbox, SandboxDecision,
};
