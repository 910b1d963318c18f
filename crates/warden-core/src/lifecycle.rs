//! The per-agent lifecycle state machine.
//!
//! Every agent follows the same transition graph; there is no back-door
//! state write. Successful transitions append a [`StateTransition`] row
//! through the [`TransitionStore`] seam and then notify keyed
//! subscribers in registration order.

use crate::error::StoreError;
use crate::identifiers::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle states. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Created,
    Initializing,
    Ready,
    Running,
    Paused,
    Error,
    Terminated,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Created => "created",
            AgentState::Initializing => "initializing",
            AgentState::Ready => "ready",
            AgentState::Running => "running",
            AgentState::Paused => "paused",
            AgentState::Error => "error",
            AgentState::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(AgentState::Created),
            "initializing" => Some(AgentState::Initializing),
            "ready" => Some(AgentState::Ready),
            "running" => Some(AgentState::Running),
            "paused" => Some(AgentState::Paused),
            "error" => Some(AgentState::Error),
            "terminated" => Some(AgentState::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that drive the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
    Initialize,
    Ready,
    Start,
    Pause,
    Resume,
    Complete,
    Fail,
    Recover,
    Terminate,
}

impl AgentEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentEvent::Initialize => "INITIALIZE",
            AgentEvent::Ready => "READY",
            AgentEvent::Start => "START",
            AgentEvent::Pause => "PAUSE",
            AgentEvent::Resume => "RESUME",
            AgentEvent::Complete => "COMPLETE",
            AgentEvent::Fail => "FAIL",
            AgentEvent::Recover => "RECOVER",
            AgentEvent::Terminate => "TERMINATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIALIZE" => Some(AgentEvent::Initialize),
            "READY" => Some(AgentEvent::Ready),
            "START" => Some(AgentEvent::Start),
            "PAUSE" => Some(AgentEvent::Pause),
            "RESUME" => Some(AgentEvent::Resume),
            "COMPLETE" => Some(AgentEvent::Complete),
            "FAIL" => Some(AgentEvent::Fail),
            "RECOVER" => Some(AgentEvent::Recover),
            "TERMINATE" => Some(AgentEvent::Terminate),
            _ => None,
        }
    }
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The permitted transition graph.
pub fn next_state(state: AgentState, event: AgentEvent) -> Option<AgentState> {
    use AgentEvent as E;
    use AgentState as S;
    match (state, event) {
        (S::Created, E::Initialize) => Some(S::Initializing),
        (S::Created, E::Terminate) => Some(S::Terminated),
        (S::Initializing, E::Ready) => Some(S::Ready),
        (S::Initializing, E::Fail) => Some(S::Error),
        (S::Initializing, E::Terminate) => Some(S::Terminated),
        (S::Ready, E::Start) => Some(S::Running),
        (S::Ready, E::Pause) => Some(S::Paused),
        (S::Ready, E::Terminate) => Some(S::Terminated),
        (S::Running, E::Complete) => Some(S::Ready),
        (S::Running, E::Pause) => Some(S::Paused),
        (S::Running, E::Fail) => Some(S::Error),
        (S::Running, E::Terminate) => Some(S::Terminated),
        (S::Paused, E::Resume) => Some(S::Ready),
        (S::Paused, E::Terminate) => Some(S::Terminated),
        (S::Error, E::Recover) => Some(S::Ready),
        (S::Error, E::Terminate) => Some(S::Terminated),
        _ => None,
    }
}

/// One successful transition, appended to the agent's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub event: AgentEvent,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Durable storage seam for agent state and transition history.
///
/// `record` must persist the agent row and the history row atomically;
/// backends use a single transaction (or equivalent rename) for the
/// pair.
pub trait TransitionStore: Send + Sync {
    fn record(
        &self,
        agent_id: &AgentId,
        state: AgentState,
        transition: &StateTransition,
    ) -> Result<(), StoreError>;

    /// Persisted history in chronological order. `limit` keeps the most
    /// recent entries; `since` filters to transitions at or after the
    /// given instant.
    fn history(
        &self,
        agent_id: &AgentId,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StateTransition>, StoreError>;
}

type Subscriber = Box<dyn Fn(&AgentId, &StateTransition) + Send + Sync>;
type PersistFailureHook = Box<dyn Fn(&AgentId, &StateTransition, &StoreError) + Send + Sync>;

/// The lifecycle state machine for one agent.
///
/// Owned by the agent's worker task; `transition` takes `&mut self` so
/// state writes are serialized by ownership rather than by locking.
pub struct LifecycleMachine {
    agent_id: AgentId,
    state: AgentState,
    store: Arc<dyn TransitionStore>,
    subscribers: Vec<(String, Subscriber)>,
    on_persist_failure: Option<PersistFailureHook>,
}

impl LifecycleMachine {
    pub fn new(agent_id: AgentId, store: Arc<dyn TransitionStore>) -> Self {
        Self {
            agent_id,
            state: AgentState::Created,
            store,
            subscribers: Vec::new(),
            on_persist_failure: None,
        }
    }

    /// Resume a machine at a recovered state (checkpoint load).
    pub fn resume_at(agent_id: AgentId, state: AgentState, store: Arc<dyn TransitionStore>) -> Self {
        Self {
            agent_id,
            state,
            store,
            subscribers: Vec::new(),
            on_persist_failure: None,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Pure predicate: would `event` be accepted right now?
    pub fn can_transition(&self, event: AgentEvent) -> bool {
        next_state(self.state, event).is_some()
    }

    /// Register a keyed subscriber. Re-registering the same key replaces
    /// the previous subscriber in place, keeping its position in the
    /// notification order.
    pub fn subscribe(
        &mut self,
        key: impl Into<String>,
        subscriber: impl Fn(&AgentId, &StateTransition) + Send + Sync + 'static,
    ) {
        let key = key.into();
        if let Some(slot) = self.subscribers.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = Box::new(subscriber);
        } else {
            self.subscribers.push((key, Box::new(subscriber)));
        }
    }

    pub fn unsubscribe(&mut self, key: &str) {
        self.subscribers.retain(|(k, _)| k != key);
    }

    /// Hook invoked when a transition applied in memory could not be
    /// persisted; the runtime wires this to a warn-severity audit event.
    pub fn on_persist_failure(
        &mut self,
        hook: impl Fn(&AgentId, &StateTransition, &StoreError) + Send + Sync + 'static,
    ) {
        self.on_persist_failure = Some(Box::new(hook));
    }

    /// Attempt a transition. Returns `true` on success.
    ///
    /// On success the transition is appended to durable history and all
    /// subscribers are notified in registration order. A rejected event
    /// has no side effects. If the durable write fails, the in-memory
    /// state is still updated and the persist-failure hook fires; the
    /// last durable checkpoint remains the recovery point. This keeps
    /// the machine truthful about what the agent is actually doing.
    pub fn transition(&mut self, event: AgentEvent, reason: Option<String>) -> bool {
        let Some(to) = next_state(self.state, event) else {
            tracing::debug!(
                agent_id = %self.agent_id,
                state = %self.state,
                event = %event,
                "Rejected lifecycle event"
            );
            return false;
        };

        let transition = StateTransition {
            from: self.state,
            to,
            event,
            timestamp: Utc::now(),
            reason,
        };

        self.state = to;

        if let Err(err) = self
            .store
            .record(&self.agent_id, self.state, &transition)
        {
            tracing::warn!(
                agent_id = %self.agent_id,
                from = %transition.from,
                to = %transition.to,
                error = %err,
                "State transition applied in memory but not persisted"
            );
            if let Some(hook) = &self.on_persist_failure {
                hook(&self.agent_id, &transition, &err);
            }
        }

        tracing::info!(
            agent_id = %self.agent_id,
            from = %transition.from,
            to = %transition.to,
            event = %event,
            "Agent state transition"
        );

        for (_, subscriber) in &self.subscribers {
            subscriber(&self.agent_id, &transition);
        }

        true
    }

    /// Persisted history, chronological.
    pub fn load_history(
        &self,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StateTransition>, StoreError> {
        self.store.history(&self.agent_id, limit, since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        rows: Mutex<Vec<(AgentState, StateTransition)>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl TransitionStore for RecordingStore {
        fn record(
            &self,
            _agent_id: &AgentId,
            state: AgentState,
            transition: &StateTransition,
        ) -> Result<(), StoreError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Backend {
                    details: "induced".into(),
                });
            }
            self.rows.lock().unwrap().push((state, transition.clone()));
            Ok(())
        }

        fn history(
            &self,
            _agent_id: &AgentId,
            limit: Option<usize>,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<StateTransition>, StoreError> {
            let rows = self.rows.lock().unwrap();
            let mut history: Vec<StateTransition> =
                rows.iter().map(|(_, t)| t.clone()).collect();
            if let Some(since) = since {
                history.retain(|t| t.timestamp >= since);
            }
            if let Some(limit) = limit {
                let skip = history.len().saturating_sub(limit);
                history.drain(..skip);
            }
            Ok(history)
        }
    }

    fn machine() -> (LifecycleMachine, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        (
            LifecycleMachine::new(AgentId::new_unchecked("a"), store.clone()),
            store,
        )
    }

    #[test]
    fn happy_path_records_five_rows() {
        let (mut machine, store) = machine();
        assert!(machine.transition(AgentEvent::Initialize, None));
        assert!(machine.transition(AgentEvent::Ready, None));
        assert!(machine.transition(AgentEvent::Start, None));
        assert!(machine.transition(AgentEvent::Complete, None));
        assert!(machine.transition(AgentEvent::Terminate, None));
        assert_eq!(machine.state(), AgentState::Terminated);
        assert_eq!(store.rows.lock().unwrap().len(), 5);
    }

    #[test]
    fn rejected_event_has_no_side_effects() {
        let (mut machine, store) = machine();
        assert!(!machine.can_transition(AgentEvent::Start));
        assert!(!machine.transition(AgentEvent::Start, None));
        assert_eq!(machine.state(), AgentState::Created);
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[test]
    fn terminated_is_absorbing() {
        let (mut machine, _) = machine();
        assert!(machine.transition(AgentEvent::Terminate, None));
        for event in [
            AgentEvent::Initialize,
            AgentEvent::Ready,
            AgentEvent::Start,
            AgentEvent::Recover,
            AgentEvent::Terminate,
        ] {
            assert!(!machine.transition(event, None));
        }
        assert_eq!(machine.state(), AgentState::Terminated);
    }

    #[test]
    fn subscribers_fire_in_registration_order() {
        let (mut machine, _) = machine();
        let order = Arc::new(Mutex::new(Vec::new()));
        for key in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            machine.subscribe(key, move |_, _| order.lock().unwrap().push(key));
        }
        machine.unsubscribe("second");
        machine.transition(AgentEvent::Initialize, None);
        assert_eq!(*order.lock().unwrap(), vec!["first", "third"]);
    }

    #[test]
    fn persist_failure_keeps_memory_state_and_fires_hook() {
        let (mut machine, store) = machine();
        store
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let hook_fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&hook_fired);
        machine.on_persist_failure(move |_, _, _| *flag.lock().unwrap() = true);

        assert!(machine.transition(AgentEvent::Initialize, None));
        assert_eq!(machine.state(), AgentState::Initializing);
        assert!(*hook_fired.lock().unwrap());
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[test]
    fn history_is_chronological_with_limit() {
        let (mut machine, _) = machine();
        machine.transition(AgentEvent::Initialize, None);
        machine.transition(AgentEvent::Ready, None);
        machine.transition(AgentEvent::Start, None);

        let history = machine.load_history(None, None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].event, AgentEvent::Initialize);
        assert_eq!(history[2].event, AgentEvent::Start);

        let tail = machine.load_history(Some(2), None).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].event, AgentEvent::Ready);
    }

    #[test]
    fn fail_carries_cancellation_reason() {
        let (mut machine, store) = machine();
        machine.transition(AgentEvent::Initialize, None);
        machine.transition(AgentEvent::Ready, None);
        machine.transition(AgentEvent::Start, None);
        assert!(machine.transition(AgentEvent::Fail, Some("cancelled".into())));
        assert_eq!(machine.state(), AgentState::Error);
        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.last().unwrap().1.reason.as_deref(), Some("cancelled"));
    }
}
