//! Per-agent runtime context and resource accounting.

use crate::identifiers::AgentId;
use crate::lifecycle::AgentState;
use crate::manifest::AgentManifest;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Monotonic usage counters for one agent.
///
/// Totals only ever grow; the `*_this_minute` counters reset when the
/// rolling minute window advances, which is the only sanctioned reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub requests: u64,
    pub tool_calls: u64,
    pub cost_micros: u64,
    pub minute_window_start: DateTime<Utc>,
    pub requests_this_minute: u64,
    pub tool_calls_this_minute: u64,
    pub tokens_this_minute: u64,
}

impl ResourceUsage {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            tokens_in: 0,
            tokens_out: 0,
            requests: 0,
            tool_calls: 0,
            cost_micros: 0,
            minute_window_start: now,
            requests_this_minute: 0,
            tool_calls_this_minute: 0,
            tokens_this_minute: 0,
        }
    }

    fn roll_window(&mut self, now: DateTime<Utc>) {
        if now - self.minute_window_start >= Duration::seconds(60) {
            self.minute_window_start = now;
            self.requests_this_minute = 0;
            self.tool_calls_this_minute = 0;
            self.tokens_this_minute = 0;
        }
    }

    pub fn record_request(&mut self, now: DateTime<Utc>) {
        self.roll_window(now);
        self.requests += 1;
        self.requests_this_minute += 1;
    }

    pub fn record_tool_call(&mut self, now: DateTime<Utc>) {
        self.roll_window(now);
        self.tool_calls += 1;
        self.tool_calls_this_minute += 1;
    }

    pub fn record_tokens(&mut self, now: DateTime<Utc>, tokens_in: u64, tokens_out: u64) {
        self.roll_window(now);
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.tokens_this_minute += tokens_in + tokens_out;
    }

    pub fn record_cost(&mut self, cost_micros: u64) {
        self.cost_micros += cost_micros;
    }
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Mutable runtime state for one agent.
///
/// Owned exclusively by the agent's worker task; created at spawn,
/// persisted on every state transition and destroyed once the lifecycle
/// reaches `terminated` and the checkpoint is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub parent_id: Option<AgentId>,
    pub manifest: AgentManifest,
    pub state: AgentState,
    pub usage: ResourceUsage,
    pub env: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl AgentContext {
    pub fn new(manifest: AgentManifest) -> Self {
        let now = Utc::now();
        Self {
            agent_id: manifest.id.clone(),
            parent_id: None,
            manifest,
            state: AgentState::Created,
            usage: ResourceUsage::new(now),
            env: BTreeMap::new(),
            created_at: now,
        }
    }

    pub fn with_parent(mut self, parent: AgentId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}
