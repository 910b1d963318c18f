//! The checkpoint storage seam.

use crate::checkpoint::AgentCheckpoint;
use warden_core::error::StoreError;
use warden_core::identifiers::AgentId;

/// Durable storage for agent checkpoints.
///
/// `save` must be atomic: readers never observe a partial write. File
/// backends write to a temporary file and rename; relational backends
/// use a single transaction.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, id: &AgentId, checkpoint: &AgentCheckpoint) -> Result<(), StoreError>;

    /// Load and, if the stored version is older, migrate.
    fn load(&self, id: &AgentId) -> Result<AgentCheckpoint, StoreError>;

    fn delete(&self, id: &AgentId) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<AgentId>, StoreError>;

    fn exists(&self, id: &AgentId) -> Result<bool, StoreError>;
}
