//! End-to-end scenarios: lifecycle, policy gating, delegation,
//! admission control and checkpoint recovery through one runtime.

use std::sync::Arc;
use std::time::Duration;
use warden_adapter::parse_adapter_config;
use warden_audit::{AuditPipeline, Category, MemorySink, Outcome};
use warden_core::capability::Capability;
use warden_core::error::WardenError;
use warden_core::identifiers::AgentId;
use warden_core::lifecycle::{AgentEvent, AgentState};
use warden_core::manifest::{AgentLimits, AgentManifest, TrustLevel};
use warden_core::ratelimit::BucketKind;
use warden_core::sandbox::GrantConstraints;
use warden_policy::{
    FileOperation, PolicyDecision, PolicyRule, PolicySetBuilder, PolicyTemplate, RuleId,
};
use warden_runtime::Runtime;
use warden_store::{CheckpointStore, InMemoryStore};

struct SharedMemorySink(Arc<MemorySink>);

impl warden_audit::AuditSink for SharedMemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&self, event: &warden_audit::AuditEvent) -> Result<(), warden_audit::SinkError> {
        use warden_audit::AuditSink;
        self.0.write(event)
    }
}

fn manifest(id: &str, capabilities: &[Capability]) -> AgentManifest {
    AgentManifest::new(AgentId::new_unchecked(id), id)
        .with_permissions(capabilities.iter().copied().collect())
        .with_trust_level(TrustLevel::SemiAutonomous)
}

#[tokio::test]
async fn happy_path_lifecycle_persists_five_transitions() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = Runtime::builder()
        .checkpoint_store(store.clone())
        .transition_store(store.clone())
        .build();

    let id = runtime
        .register(manifest("a", &[Capability::LlmChat]))
        .unwrap();
    assert_eq!(runtime.state(&id).unwrap(), AgentState::Created);

    for event in [
        AgentEvent::Initialize,
        AgentEvent::Ready,
        AgentEvent::Start,
        AgentEvent::Complete,
    ] {
        assert!(runtime.signal(&id, event, None).unwrap());
    }
    assert_eq!(runtime.state(&id).unwrap(), AgentState::Ready);

    let history = runtime.history(&id, None).unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].event, AgentEvent::Initialize);
    assert_eq!(history[3].event, AgentEvent::Complete);

    assert!(runtime.signal(&id, AgentEvent::Terminate, None).unwrap());
    // Terminated agents are destroyed together with their checkpoint.
    assert!(matches!(
        runtime.state(&id),
        Err(WardenError::NotFound { .. })
    ));
    assert!(!store.exists(&id).unwrap());
    // All five rows survive in the transition store.
    use warden_core::lifecycle::TransitionStore;
    assert_eq!(store.history(&id, None, None).unwrap().len(), 5);
}

#[tokio::test]
async fn policy_block_is_audited_with_matching_rule() {
    let memory = Arc::new(MemorySink::new());
    let audit = AuditPipeline::builder()
        .sink(SharedMemorySink(Arc::clone(&memory)))
        .build();
    let runtime = Runtime::builder()
        .policy(
            PolicySetBuilder::new(PolicyTemplate::Permissive)
                .rule(PolicyRule::File(warden_policy::FileRule {
                    id: RuleId::new("ssh-block"),
                    pattern: "**/.ssh/**".to_string(),
                    operations: None,
                    decision: PolicyDecision::Block,
                    priority: 100,
                    enabled: true,
                    reason: Some("key material".to_string()),
                }))
                .build(),
        )
        .audit(audit)
        .build();

    let id = runtime
        .register(manifest("reader", &[Capability::FileRead]))
        .unwrap();

    let err = runtime
        .authorize_file(&id, "/home/u/.ssh/id_rsa", FileOperation::Read)
        .await
        .unwrap_err();
    match err {
        WardenError::PolicyBlocked { rule_id, .. } => {
            assert_eq!(rule_id.as_deref(), Some("ssh-block"));
        }
        other => panic!("expected PolicyBlocked, got {other:?}"),
    }

    runtime.audit().flush();
    let blocked = memory.events().into_iter().find(|event| {
        event.category == Category::Permission && event.outcome == Outcome::Blocked
    });
    assert!(blocked.is_some(), "expected a blocked permission event");
}

#[tokio::test]
async fn priority_wins_over_registration_order() {
    let runtime = Runtime::builder()
        .policy(
            PolicySetBuilder::new(PolicyTemplate::Permissive)
                .rule(PolicyRule::File(warden_policy::FileRule {
                    id: RuleId::new("R1"),
                    pattern: "/tmp/**".to_string(),
                    operations: None,
                    decision: PolicyDecision::Allow,
                    priority: 10,
                    enabled: true,
                    reason: None,
                }))
                .rule(PolicyRule::File(warden_policy::FileRule {
                    id: RuleId::new("R2"),
                    pattern: "/tmp/secret".to_string(),
                    operations: None,
                    decision: PolicyDecision::Block,
                    priority: 100,
                    enabled: true,
                    reason: None,
                }))
                .build(),
        )
        .build();
    let id = runtime
        .register(manifest("worker", &[Capability::FileRead]))
        .unwrap();

    let err = runtime
        .authorize_file(&id, "/tmp/secret/x", FileOperation::Read)
        .await
        .unwrap_err();
    match err {
        WardenError::PolicyBlocked { rule_id, .. } => {
            assert_eq!(rule_id.as_deref(), Some("R2"));
        }
        other => panic!("expected PolicyBlocked, got {other:?}"),
    }

    runtime
        .authorize_file(&id, "/tmp/other/file", FileOperation::Read)
        .await
        .unwrap();
}

#[tokio::test]
async fn token_bucket_refills_continuously() {
    let runtime = Runtime::builder().build();
    let limits = AgentLimits {
        requests_per_minute: 60,
        ..AgentLimits::default()
    };
    let id = runtime
        .register(
            manifest("bursty", &[Capability::LlmChat]).with_limits(limits),
        )
        .unwrap();

    // Drain the bucket.
    runtime
        .admit(&id, BucketKind::RequestsPerMinute, 60)
        .unwrap();
    let err = runtime
        .admit(&id, BucketKind::RequestsPerMinute, 1)
        .unwrap_err();
    match err {
        WardenError::RateLimited { retry_after_ms, .. } => {
            assert!(retry_after_ms.unwrap() <= 1_000);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    // One second at 60/min refills one token.
    runtime
        .limiter()
        .advance_for_test(&id, BucketKind::RequestsPerMinute, Duration::from_secs(1));
    runtime
        .admit(&id, BucketKind::RequestsPerMinute, 1)
        .unwrap();
    assert_eq!(runtime.limiter().peek(&id, BucketKind::RequestsPerMinute), 0);
}

#[tokio::test]
async fn oversized_requests_hit_the_token_ceiling() {
    let runtime = Runtime::builder().build();
    let id = runtime
        .register(
            manifest("chatty", &[Capability::LlmChat]).with_limits(AgentLimits {
                max_tokens_per_request: 1_000,
                ..AgentLimits::default()
            }),
        )
        .unwrap();

    runtime.check_request_tokens(&id, 999).unwrap();
    let err = runtime.check_request_tokens(&id, 1_001).unwrap_err();
    assert!(matches!(
        err,
        WardenError::ResourceExceeded { used: 1_001, limit: 1_000, .. }
    ));
}

#[tokio::test]
async fn delegation_intersects_and_refuses_escapes() {
    let runtime = Runtime::builder().build();
    let parent = runtime
        .register(manifest("parent", &[]))
        .unwrap();
    let child = runtime.register(manifest("child", &[])).unwrap();

    let root = runtime
        .grant(
            &parent,
            Capability::FileRead,
            GrantConstraints::for_paths(["/work/**"]),
            true,
        )
        .unwrap();

    let parent_sandbox = runtime.sandbox(&parent).unwrap();
    parent_sandbox
        .delegate(
            root,
            &child,
            Some(GrantConstraints::for_paths(["/work/project/**"])),
            None,
        )
        .unwrap();

    let child_sandbox = runtime.sandbox(&child).unwrap();
    assert!(
        child_sandbox
            .check_path_constraint(Capability::FileRead, "/work/project/main.rs")
            .allowed
    );
    assert!(
        !child_sandbox
            .check_path_constraint(Capability::FileRead, "/work/elsewhere")
            .allowed
    );

    let escape = parent_sandbox.delegate(
        root,
        &child,
        Some(GrantConstraints::for_paths(["/etc/**"])),
        None,
    );
    assert!(matches!(
        escape,
        Err(WardenError::PermissionDenied { .. })
    ));
}

/// Checkpoint store that starts failing saves on demand, counting
/// every attempt.
struct BreakableStore {
    inner: InMemoryStore,
    broken: std::sync::atomic::AtomicBool,
    save_attempts: std::sync::atomic::AtomicUsize,
}

impl BreakableStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            broken: std::sync::atomic::AtomicBool::new(false),
            save_attempts: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl CheckpointStore for BreakableStore {
    fn save(
        &self,
        id: &AgentId,
        checkpoint: &warden_store::AgentCheckpoint,
    ) -> Result<(), warden_core::StoreError> {
        self.save_attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(warden_core::StoreError::Backend {
                details: "induced outage".into(),
            });
        }
        self.inner.save(id, checkpoint)
    }

    fn load(&self, id: &AgentId) -> Result<warden_store::AgentCheckpoint, warden_core::StoreError> {
        self.inner.load(id)
    }

    fn delete(&self, id: &AgentId) -> Result<(), warden_core::StoreError> {
        self.inner.delete(id)
    }

    fn list(&self) -> Result<Vec<AgentId>, warden_core::StoreError> {
        self.inner.list()
    }

    fn exists(&self, id: &AgentId) -> Result<bool, warden_core::StoreError> {
        self.inner.exists(id)
    }
}

#[tokio::test]
async fn persistent_storage_failure_retries_then_fails_the_agent() {
    let store = Arc::new(BreakableStore::new());
    let runtime = Runtime::builder()
        .checkpoint_store(store.clone())
        .build();
    let id = runtime
        .register(manifest("fragile", &[Capability::LlmChat]))
        .unwrap();
    runtime.signal(&id, AgentEvent::Initialize, None).unwrap();
    runtime.signal(&id, AgentEvent::Ready, None).unwrap();

    let healthy_attempts = store
        .save_attempts
        .load(std::sync::atomic::Ordering::SeqCst);
    store
        .broken
        .store(true, std::sync::atomic::Ordering::SeqCst);

    // The transition to `running` is accepted, but its checkpoint save
    // exhausts the retry budget and the agent escalates to `error`.
    let err = runtime
        .signal(&id, AgentEvent::Start, None)
        .unwrap_err();
    assert!(matches!(err, WardenError::Storage(_)));
    assert_eq!(
        store
            .save_attempts
            .load(std::sync::atomic::Ordering::SeqCst),
        healthy_attempts + 3,
        "expected one save per backoff attempt"
    );
    assert_eq!(runtime.state(&id).unwrap(), AgentState::Error);

    // Once storage heals, the agent recovers through the normal table.
    store
        .broken
        .store(false, std::sync::atomic::Ordering::SeqCst);
    assert!(runtime.signal(&id, AgentEvent::Recover, None).unwrap());
    assert_eq!(runtime.state(&id).unwrap(), AgentState::Ready);
}

#[tokio::test]
async fn checkpoint_recovery_restores_state_history_and_grants() {
    let store = Arc::new(InMemoryStore::new());

    let first = Runtime::builder()
        .checkpoint_store(store.clone())
        .transition_store(store.clone())
        .build();
    let id = first
        .register(manifest("survivor", &[Capability::LlmChat]))
        .unwrap();
    for event in [AgentEvent::Initialize, AgentEvent::Ready, AgentEvent::Start] {
        first.signal(&id, event, None).unwrap();
    }
    // Mirror some accounted usage into the persisted context.
    first.shutdown();

    // A fresh runtime instance over the same stores.
    let second = Runtime::builder()
        .checkpoint_store(store.clone())
        .transition_store(store.clone())
        .build();
    assert_eq!(second.recover().unwrap(), 1);

    assert_eq!(second.state(&id).unwrap(), AgentState::Running);
    let history = second.history(&id, None).unwrap();
    assert_eq!(history.len(), 3);

    let sandbox = second.sandbox(&id).unwrap();
    assert!(
        sandbox
            .check(Capability::LlmChat, &warden_core::sandbox::CheckOptions::none())
            .allowed
    );

    // The recovered machine keeps obeying the transition table.
    assert!(second.signal(&id, AgentEvent::Fail, None).unwrap());
    assert_eq!(second.state(&id).unwrap(), AgentState::Error);
}

#[tokio::test]
async fn adapter_agent_runs_inside_the_gates() {
    let runtime = Runtime::builder().build();
    let config = parse_adapter_config(
        r#"
framework: langgraph
name: hosted-researcher
graph:
  nodes:
    - id: fetch
      tool: http_fetch
"#,
    )
    .unwrap();

    let (agent_id, mut adapter) = runtime.register_adapter_agent(&config).unwrap();
    runtime.start_adapter(&agent_id, &mut adapter).unwrap();

    let sandbox = runtime.sandbox(&agent_id).unwrap();
    let gate = warden_adapter::ActionGate::new(&sandbox, runtime.policy());
    let frame = adapter
        .handle_message(
            warden_adapter::AdapterMessage::ToolCall {
                tool: "http_fetch".to_string(),
                arguments: serde_json::json!({"url": "https://api.example.com/data"}),
            },
            &gate,
            &warden_core::cancel::CancelToken::never(),
        )
        .await
        .unwrap();
    assert_eq!(frame.res["tool"], "http_fetch");

    // The metadata service stays unreachable no matter the grants.
    let err = adapter
        .handle_message(
            warden_adapter::AdapterMessage::ToolCall {
                tool: "http_fetch".to_string(),
                arguments: serde_json::json!({"url": "http://169.254.169.254/meta"}),
            },
            &gate,
            &warden_core::cancel::CancelToken::never(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::PermissionDenied { .. }));
}
