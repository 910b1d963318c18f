//! Periodic auto-checkpointing.

use crate::checkpoint::AgentCheckpoint;
use crate::store::CheckpointStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Supplies the current snapshots to persist on each tick.
pub type SnapshotFn = dyn Fn() -> Vec<AgentCheckpoint> + Send + Sync;

/// Timer that periodically snapshots live agents through a
/// caller-supplied getter. An interval of zero disables it.
pub struct AutoCheckpointer {
    handle: Option<JoinHandle<()>>,
}

impl AutoCheckpointer {
    pub fn start(
        store: Arc<dyn CheckpointStore>,
        snapshot: Arc<SnapshotFn>,
        interval: Duration,
    ) -> Self {
        if interval.is_zero() {
            tracing::debug!("Auto-checkpointing disabled");
            return Self { handle: None };
        }
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so a tick
            // means "interval elapsed".
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for checkpoint in snapshot() {
                    let agent_id = checkpoint.agent_id.clone();
                    if let Err(error) = store.save(&agent_id, &checkpoint) {
                        tracing::warn!(
                            agent_id = %agent_id,
                            error = %error,
                            "Auto-checkpoint save failed"
                        );
                    }
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for AutoCheckpointer {
    fn drop(&mut self) {
        self.stop();
    }
}
