//! # Warden Store
//!
//! Durable storage for agent checkpoints and transition history behind
//! a narrow interface, with in-memory, file and SQLite backends.

pub mod auto;
pub mod checkpoint;
pub mod file;
pub mod in_memory;
pub mod sqlite;
pub mod store;

pub use auto::AutoCheckpointer;
pub use checkpoint::{AgentCheckpoint, CHECKPOINT_VERSION, migrate};
pub use file::FileStore;
pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store::CheckpointStore;
