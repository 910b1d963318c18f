//! # Warden Runtime
//!
//! The composition root: an explicit [`Runtime`] value owns the agent
//! registry and wires the checkpoint store, the policy engine, the
//! audit pipeline and the rate limiter together. There are no process
//! globals; tests construct a fresh runtime per case.

mod runtime;

pub use runtime::{Runtime, RuntimeBuilder};
