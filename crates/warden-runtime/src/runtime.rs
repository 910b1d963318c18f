//! The runtime handle and agent registry.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_adapter::{ActionGate, Adapter, AdapterConfig, adapter_for};
use warden_audit::{AuditEvent, AuditPipeline, Category, Outcome, Severity};
use warden_core::capability::Capability;
use warden_core::cancel::CancelSource;
use warden_core::context::AgentContext;
use warden_core::error::{StoreError, WardenError, WardenResult};
use warden_core::identifiers::AgentId;
use warden_core::lifecycle::{
    AgentEvent, AgentState, LifecycleMachine, StateTransition, TransitionStore,
};
use warden_core::manifest::AgentManifest;
use warden_core::ratelimit::{BucketKind, RateLimiter};
use warden_core::sandbox::{GrantConstraints, GrantRegistry, Sandbox};
use warden_policy::{FileOperation, PolicyEngine, PolicySet, PolicyTemplate};
use warden_store::{AgentCheckpoint, AutoCheckpointer, CheckpointStore};

/// Checkpoint saves retry this many times before the agent is failed.
const SAVE_ATTEMPTS: u32 = 3;
const SAVE_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Everything the runtime tracks for one live agent.
///
/// The handle is behind a mutex: all mutations of one agent's context
/// and lifecycle are serialized, which is the per-agent single-writer
/// model with the locking pushed to the registry edge.
struct AgentHandle {
    context: AgentContext,
    machine: LifecycleMachine,
    sandbox: Sandbox,
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    transitions: Option<Arc<dyn TransitionStore>>,
    policy: Option<PolicySet>,
    audit: Option<Arc<AuditPipeline>>,
    auto_checkpoint: Duration,
}

impl RuntimeBuilder {
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn transition_store(mut self, store: Arc<dyn TransitionStore>) -> Self {
        self.transitions = Some(store);
        self
    }

    pub fn policy(mut self, set: PolicySet) -> Self {
        self.policy = Some(set);
        self
    }

    pub fn audit(mut self, pipeline: Arc<AuditPipeline>) -> Self {
        self.audit = Some(pipeline);
        self
    }

    /// Enable periodic snapshots of every live agent. Zero disables.
    pub fn auto_checkpoint(mut self, interval: Duration) -> Self {
        self.auto_checkpoint = interval;
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        let store: Arc<dyn CheckpointStore> = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(warden_store::InMemoryStore::new()));
        let transitions: Arc<dyn TransitionStore> = self
            .transitions
            .unwrap_or_else(|| Arc::new(warden_store::InMemoryStore::new()));
        let audit = self
            .audit
            .unwrap_or_else(|| AuditPipeline::builder().build());
        let runtime = Arc::new(Runtime {
            checkpoints: store,
            transitions,
            grants: Arc::new(GrantRegistry::new()),
            policy: Arc::new(PolicyEngine::new(
                self.policy
                    .unwrap_or_else(|| PolicySet::from_template(PolicyTemplate::Balanced)),
            )),
            limiter: Arc::new(RateLimiter::new()),
            audit,
            agents: DashMap::new(),
            shutdown: CancelSource::new(),
            checkpointer: Mutex::new(None),
        });
        if !self.auto_checkpoint.is_zero() {
            runtime.start_auto_checkpoint(self.auto_checkpoint);
        }
        runtime
    }
}

/// A single authoritative runtime instance for its agents.
pub struct Runtime {
    checkpoints: Arc<dyn CheckpointStore>,
    transitions: Arc<dyn TransitionStore>,
    grants: Arc<GrantRegistry>,
    policy: Arc<PolicyEngine>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditPipeline>,
    agents: DashMap<AgentId, Mutex<AgentHandle>>,
    shutdown: CancelSource,
    checkpointer: Mutex<Option<AutoCheckpointer>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder {
            checkpoints: None,
            transitions: None,
            policy: None,
            audit: None,
            auto_checkpoint: Duration::ZERO,
        }
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn audit(&self) -> &Arc<AuditPipeline> {
        &self.audit
    }

    /// Token observed by long-running operations; fires at shutdown.
    pub fn shutdown_token(&self) -> warden_core::cancel::CancelToken {
        self.shutdown.token()
    }

    /// Register a manifest. The agent starts in `created` with root
    /// grants for each required permission and its limits applied to
    /// the rate limiter.
    pub fn register(&self, manifest: AgentManifest) -> WardenResult<AgentId> {
        let agent_id = manifest.id.clone();
        if self.agents.contains_key(&agent_id) {
            return Err(WardenError::Conflict {
                reason: format!("agent '{agent_id}' is already registered"),
            });
        }

        let sandbox = Sandbox::new(agent_id.clone(), Arc::clone(&self.grants));
        for capability in &manifest.required_permissions {
            sandbox.grant(*capability, GrantConstraints::unrestricted(), true, None);
        }
        self.limiter.configure_agent(&agent_id, &manifest.limits);

        let context = AgentContext::new(manifest);
        let mut machine =
            LifecycleMachine::new(agent_id.clone(), Arc::clone(&self.transitions));
        self.wire_machine(&mut machine);

        self.agents.insert(
            agent_id.clone(),
            Mutex::new(AgentHandle {
                context,
                machine,
                sandbox,
            }),
        );
        self.save_checkpoint(&agent_id)?;

        self.audit.log(
            AuditEvent::new(
                Category::Lifecycle,
                Severity::Info,
                format!("agent '{agent_id}' registered"),
            )
            .with_agent(agent_id.clone())
            .with_tag("register"),
        );
        Ok(agent_id)
    }

    /// Audit wiring shared by fresh and recovered machines.
    fn wire_machine(&self, machine: &mut LifecycleMachine) {
        let audit = Arc::clone(&self.audit);
        machine.subscribe("audit", move |agent_id, transition| {
            audit.log(
                AuditEvent::new(
                    Category::State,
                    Severity::Info,
                    format!(
                        "{} -> {} on {}",
                        transition.from, transition.to, transition.event
                    ),
                )
                .with_agent(agent_id.clone())
                .with_tag(transition.event.as_str().to_ascii_lowercase()),
            );
        });
        let audit = Arc::clone(&self.audit);
        machine.on_persist_failure(move |agent_id, transition, error| {
            audit.log(
                AuditEvent::new(
                    Category::State,
                    Severity::Warn,
                    format!(
                        "transition {} -> {} applied in memory but not persisted: {error}",
                        transition.from, transition.to
                    ),
                )
                .with_agent(agent_id.clone())
                .with_tag("persist-failure")
                .with_outcome(Outcome::Failure),
            );
        });
    }

    fn with_agent<T>(
        &self,
        agent_id: &AgentId,
        f: impl FnOnce(&mut AgentHandle) -> T,
    ) -> WardenResult<T> {
        let entry = self.agents.get(agent_id).ok_or_else(|| WardenError::NotFound {
            what: format!("agent '{agent_id}'"),
        })?;
        let mut handle = entry.lock().unwrap();
        Ok(f(&mut handle))
    }

    /// Drive one lifecycle event. On acceptance the context is
    /// persisted; terminal transitions also clean up grants, buckets
    /// and the checkpoint.
    pub fn signal(
        &self,
        agent_id: &AgentId,
        event: AgentEvent,
        reason: Option<String>,
    ) -> WardenResult<bool> {
        let accepted = self.with_agent(agent_id, |handle| {
            let accepted = handle.machine.transition(event, reason);
            if accepted {
                handle.context.state = handle.machine.state();
            }
            accepted
        })?;

        if !accepted {
            return Ok(false);
        }

        if self.state(agent_id)? == AgentState::Terminated {
            self.cleanup_terminated(agent_id)?;
        } else {
            self.save_checkpoint(agent_id)?;
        }
        Ok(true)
    }

    /// A cancelled running operation fails the agent with a tagged
    /// reason; terminal for the operation, recoverable for the agent.
    pub fn cancel_running(&self, agent_id: &AgentId) -> WardenResult<bool> {
        self.signal(agent_id, AgentEvent::Fail, Some("cancelled".to_string()))
    }

    fn cleanup_terminated(&self, agent_id: &AgentId) -> WardenResult<()> {
        self.grants.remove_agent(agent_id);
        self.limiter.reset(agent_id, None);
        self.checkpoints.delete(agent_id)?;
        self.agents.remove(agent_id);
        self.audit.log(
            AuditEvent::new(
                Category::Lifecycle,
                Severity::Info,
                format!("agent '{agent_id}' terminated and cleaned up"),
            )
            .with_agent(agent_id.clone())
            .with_tag("terminate"),
        );
        Ok(())
    }

    pub fn state(&self, agent_id: &AgentId) -> WardenResult<AgentState> {
        self.with_agent(agent_id, |handle| handle.machine.state())
    }

    pub fn context(&self, agent_id: &AgentId) -> WardenResult<AgentContext> {
        self.with_agent(agent_id, |handle| handle.context.clone())
    }

    pub fn history(
        &self,
        agent_id: &AgentId,
        limit: Option<usize>,
    ) -> WardenResult<Vec<StateTransition>> {
        self.with_agent(agent_id, |handle| handle.machine.load_history(limit, None))?
            .map_err(WardenError::from)
    }

    pub fn sandbox(&self, agent_id: &AgentId) -> WardenResult<Sandbox> {
        self.with_agent(agent_id, |handle| handle.sandbox.clone())
    }

    pub fn list_agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Admission control for one bucket. Denials are audited and come
    /// back as `RateLimited`.
    pub fn admit(&self, agent_id: &AgentId, kind: BucketKind, n: u64) -> WardenResult<()> {
        let outcome = self.limiter.try_consume(agent_id, kind, n);
        if outcome.allowed {
            return Ok(());
        }
        self.audit.log(
            AuditEvent::new(
                Category::Resource,
                Severity::Warn,
                format!("{kind} exhausted (requested {n}, remaining {})", outcome.remaining),
            )
            .with_agent(agent_id.clone())
            .with_tag(kind.as_str())
            .with_outcome(Outcome::Denied),
        );
        Err(WardenError::RateLimited {
            bucket: kind.to_string(),
            retry_after_ms: outcome.retry_after_ms,
        })
    }

    /// Enforce the manifest's hard per-request token ceiling.
    pub fn check_request_tokens(&self, agent_id: &AgentId, tokens: u64) -> WardenResult<()> {
        let limit = self.context(agent_id)?.manifest.limits.max_tokens_per_request as u64;
        if tokens > limit {
            self.audit.log(
                AuditEvent::new(
                    Category::Resource,
                    Severity::Warn,
                    format!("request of {tokens} tokens exceeds the per-request ceiling"),
                )
                .with_agent(agent_id.clone())
                .with_tag("max-tokens-per-request")
                .with_outcome(Outcome::Denied),
            );
            return Err(WardenError::ResourceExceeded {
                resource: "tokens-per-request".to_string(),
                used: tokens,
                limit,
            });
        }
        Ok(())
    }

    fn audit_authorization(
        &self,
        agent_id: &AgentId,
        action: &str,
        subject: &str,
        result: &WardenResult<()>,
    ) {
        let (severity, outcome, suffix) = match result {
            Ok(()) => (Severity::Debug, Outcome::Success, String::new()),
            Err(error) => {
                let outcome = if matches!(error, WardenError::PolicyBlocked { .. }) {
                    Outcome::Blocked
                } else {
                    Outcome::Denied
                };
                (Severity::Warn, outcome, format!(": {error}"))
            }
        };
        self.audit.log(
            AuditEvent::new(
                Category::Permission,
                severity,
                format!("{action} {subject}{suffix}"),
            )
            .with_agent(agent_id.clone())
            .with_tag(action)
            .with_outcome(outcome),
        );
    }

    /// File access through both gates, audited.
    pub async fn authorize_file(
        &self,
        agent_id: &AgentId,
        path: &str,
        operation: FileOperation,
    ) -> WardenResult<()> {
        let sandbox = self.sandbox(agent_id)?;
        let gate = ActionGate::new(&sandbox, &self.policy);
        let result = gate.authorize_file(path, operation).await;
        self.audit_authorization(agent_id, &format!("file.{operation}"), path, &result);
        result
    }

    /// Network access through both gates, audited.
    pub async fn authorize_network(
        &self,
        agent_id: &AgentId,
        host: &str,
        port: Option<u16>,
        scheme: Option<&str>,
    ) -> WardenResult<()> {
        let sandbox = self.sandbox(agent_id)?;
        let gate = ActionGate::new(&sandbox, &self.policy);
        let result = gate.authorize_network(host, port, scheme).await;
        self.audit_authorization(agent_id, "network.connect", host, &result);
        result
    }

    /// Shell execution through both gates, audited.
    pub async fn authorize_shell(&self, agent_id: &AgentId, command: &str) -> WardenResult<()> {
        let sandbox = self.sandbox(agent_id)?;
        let gate = ActionGate::new(&sandbox, &self.policy);
        let result = gate.authorize_shell(command).await;
        self.audit_authorization(agent_id, "shell.execute", command, &result);
        result
    }

    /// Secret access through both gates, audited.
    pub async fn authorize_secret(&self, agent_id: &AgentId, name: &str) -> WardenResult<()> {
        let sandbox = self.sandbox(agent_id)?;
        let gate = ActionGate::new(&sandbox, &self.policy);
        let result = gate.authorize_secret(name).await;
        self.audit_authorization(agent_id, "secret.read", name, &result);
        result
    }

    /// Register an agent straight from a foreign-framework
    /// configuration: the manifest's permissions are the adapter's
    /// derived capability set.
    pub fn register_adapter_agent(
        &self,
        config: &AdapterConfig,
    ) -> WardenResult<(AgentId, Box<dyn Adapter>)> {
        let mut adapter = adapter_for(config)?;
        adapter.load(config)?;

        let name = config
            .document
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("adapter-agent");
        let agent_id = AgentId::parse(name).map_err(|e| WardenError::InvalidConfiguration {
            reason: format!("adapter agent name '{name}': {e}"),
        })?;

        let manifest = AgentManifest::new(agent_id.clone(), name)
            .with_entry_point(config.framework.clone())
            .with_permissions(adapter.required_capabilities().clone());
        self.register(manifest)?;
        Ok((agent_id, adapter))
    }

    /// Start a loaded adapter against its agent's sandbox.
    pub fn start_adapter(
        &self,
        agent_id: &AgentId,
        adapter: &mut Box<dyn Adapter>,
    ) -> WardenResult<()> {
        let sandbox = self.sandbox(agent_id)?;
        adapter.start(&sandbox)
    }

    fn snapshot_handle(&self, handle: &AgentHandle) -> AgentCheckpoint {
        let history = handle
            .machine
            .load_history(None, None)
            .unwrap_or_default();
        AgentCheckpoint::capture(
            &handle.context,
            history,
            handle.sandbox.snapshot_grants(),
        )
    }

    /// Persist the agent's checkpoint, retrying transient storage
    /// failures with exponential back-off. A failure that survives
    /// every attempt escalates the agent to `error` before the error
    /// is returned.
    fn save_checkpoint(&self, agent_id: &AgentId) -> WardenResult<()> {
        let checkpoint =
            self.with_agent(agent_id, |handle| self.snapshot_handle(handle))?;

        let mut delay = SAVE_BACKOFF_BASE;
        let mut error = match self.checkpoints.save(agent_id, &checkpoint) {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };
        for attempt in 2..=SAVE_ATTEMPTS {
            tracing::warn!(
                agent_id = %agent_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Checkpoint save failed; backing off before retry"
            );
            std::thread::sleep(delay);
            delay *= 2;
            match self.checkpoints.save(agent_id, &checkpoint) {
                Ok(()) => return Ok(()),
                Err(retry_error) => error = retry_error,
            }
        }

        self.fail_agent_for_storage(agent_id, &error);
        Err(WardenError::Storage(error))
    }

    /// Persistent storage failure: drive the agent into `error` where
    /// the transition table allows it, and record the escalation
    /// either way.
    fn fail_agent_for_storage(&self, agent_id: &AgentId, error: &StoreError) {
        let failed = self
            .with_agent(agent_id, |handle| {
                let failed = handle
                    .machine
                    .transition(AgentEvent::Fail, Some(format!("storage failure: {error}")));
                if failed {
                    handle.context.state = handle.machine.state();
                }
                failed
            })
            .unwrap_or(false);
        if !failed {
            tracing::warn!(
                agent_id = %agent_id,
                error = %error,
                "Storage failure persisted but the current state accepts no FAIL event"
            );
        }
        self.audit.log(
            AuditEvent::new(
                Category::Error,
                Severity::Error,
                format!("checkpoint save for '{agent_id}' failed after {SAVE_ATTEMPTS} attempts: {error}"),
            )
            .with_agent(agent_id.clone())
            .with_tag("storage")
            .with_outcome(Outcome::Failure),
        );
    }

    /// Snapshots of every live agent, the auto-checkpointer's getter.
    pub fn snapshot_all(&self) -> Vec<AgentCheckpoint> {
        self.agents
            .iter()
            .map(|entry| {
                let handle = entry.lock().unwrap();
                self.snapshot_handle(&handle)
            })
            .collect()
    }

    fn start_auto_checkpoint(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let checkpointer = AutoCheckpointer::start(
            Arc::clone(&self.checkpoints),
            Arc::new(move || {
                weak.upgrade()
                    .map(|runtime| runtime.snapshot_all())
                    .unwrap_or_default()
            }),
            interval,
        );
        *self.checkpointer.lock().unwrap() = Some(checkpointer);
    }

    /// Rehydrate agents from the checkpoint store after a restart.
    /// Buckets intentionally refill to capacity; grants and history
    /// come back from the checkpoint.
    pub fn recover(&self) -> WardenResult<usize> {
        let mut recovered = 0;
        for agent_id in self.checkpoints.list()? {
            if self.agents.contains_key(&agent_id) {
                continue;
            }
            let checkpoint = self.checkpoints.load(&agent_id)?;
            let context = checkpoint.restore_context();

            let sandbox = Sandbox::new(agent_id.clone(), Arc::clone(&self.grants));
            for grant in checkpoint.capabilities {
                sandbox.adopt(grant);
            }
            self.limiter
                .configure_agent(&agent_id, &context.manifest.limits);

            let mut machine = LifecycleMachine::resume_at(
                agent_id.clone(),
                checkpoint.state,
                Arc::clone(&self.transitions),
            );
            self.wire_machine(&mut machine);

            self.agents.insert(
                agent_id.clone(),
                Mutex::new(AgentHandle {
                    context,
                    machine,
                    sandbox,
                }),
            );
            self.audit.log(
                AuditEvent::new(
                    Category::Lifecycle,
                    Severity::Info,
                    format!("agent '{agent_id}' recovered at state '{}'", checkpoint.state),
                )
                .with_agent(agent_id.clone())
                .with_tag("recover"),
            );
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Flush audit and stop background tasks. Live agents stay
    /// checkpointed for the next start.
    pub fn shutdown(&self) {
        self.shutdown.cancel("runtime shutdown");
        if let Some(mut checkpointer) = self.checkpointer.lock().unwrap().take() {
            checkpointer.stop();
        }
        for agent_id in self.list_agents() {
            if let Err(error) = self.save_checkpoint(&agent_id) {
                tracing::warn!(agent_id = %agent_id, error = %error, "Final checkpoint failed");
            }
        }
        self.audit.log(AuditEvent::new(
            Category::System,
            Severity::Info,
            "runtime shut down",
        ));
        self.audit.close();
    }

    /// Issue an additional system grant to a live agent.
    pub fn grant(
        &self,
        agent_id: &AgentId,
        capability: Capability,
        constraints: GrantConstraints,
        delegatable: bool,
    ) -> WardenResult<warden_core::identifiers::GrantId> {
        let sandbox = self.sandbox(agent_id)?;
        let grant_id = sandbox.grant(capability, constraints, delegatable, None);
        self.save_checkpoint(agent_id)?;
        Ok(grant_id)
    }
}
