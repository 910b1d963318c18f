//! In-memory store, for tests and ephemeral runtimes.

use crate::checkpoint::AgentCheckpoint;
use crate::store::CheckpointStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use warden_core::error::StoreError;
use warden_core::identifiers::AgentId;
use warden_core::lifecycle::{AgentState, StateTransition, TransitionStore};

/// Checkpoints and transition history held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    checkpoints: DashMap<AgentId, AgentCheckpoint>,
    history: DashMap<AgentId, Vec<StateTransition>>,
    states: DashMap<AgentId, AgentState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last state recorded through the transition seam.
    pub fn recorded_state(&self, id: &AgentId) -> Option<AgentState> {
        self.states.get(id).map(|entry| *entry)
    }
}

impl CheckpointStore for InMemoryStore {
    fn save(&self, id: &AgentId, checkpoint: &AgentCheckpoint) -> Result<(), StoreError> {
        self.checkpoints.insert(id.clone(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, id: &AgentId) -> Result<AgentCheckpoint, StoreError> {
        self.checkpoints
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    fn delete(&self, id: &AgentId) -> Result<(), StoreError> {
        // History stays: the transition log is append-only.
        self.checkpoints.remove(id);
        self.states.remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<AgentId>, StoreError> {
        let mut ids: Vec<AgentId> = self.checkpoints.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    fn exists(&self, id: &AgentId) -> Result<bool, StoreError> {
        Ok(self.checkpoints.contains_key(id))
    }
}

impl TransitionStore for InMemoryStore {
    fn record(
        &self,
        agent_id: &AgentId,
        state: AgentState,
        transition: &StateTransition,
    ) -> Result<(), StoreError> {
        self.states.insert(agent_id.clone(), state);
        self.history
            .entry(agent_id.clone())
            .or_default()
            .push(transition.clone());
        Ok(())
    }

    fn history(
        &self,
        agent_id: &AgentId,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StateTransition>, StoreError> {
        let mut rows = self
            .history
            .get(agent_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        if let Some(since) = since {
            rows.retain(|t| t.timestamp >= since);
        }
        if let Some(limit) = limit {
            let skip = rows.len().saturating_sub(limit);
            rows.drain(..skip);
        }
        Ok(rows)
    }
}
