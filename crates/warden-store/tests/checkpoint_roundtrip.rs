//! Checkpoint round-trip properties: `load(save(x)) == x` across
//! backends, modulo nothing — the JSON codec keeps full timestamp
//! resolution.

use proptest::prelude::*;
use std::collections::BTreeMap;
use warden_core::capability::Capability;
use warden_core::context::AgentContext;
use warden_core::identifiers::AgentId;
use warden_core::manifest::{AgentLimits, AgentManifest, TrustLevel};
use warden_store::{AgentCheckpoint, CheckpointStore, FileStore, InMemoryStore, SqliteStore};

fn build_checkpoint(
    id: String,
    tokens_in: u64,
    requests: u64,
    env: BTreeMap<String, String>,
) -> AgentCheckpoint {
    let manifest = AgentManifest::new(AgentId::new_unchecked(id), "prop-agent")
        .with_version("2.0.0")
        .with_permissions([Capability::LlmChat, Capability::FileRead].into())
        .with_trust_level(TrustLevel::SemiAutonomous)
        .with_limits(AgentLimits {
            requests_per_minute: 30,
            ..AgentLimits::default()
        });
    let mut context = AgentContext::new(manifest).with_env(env);
    context.usage.tokens_in = tokens_in;
    context.usage.requests = requests;
    AgentCheckpoint::capture(&context, Vec::new(), Vec::new())
}

fn id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}"
}

fn env_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    proptest::collection::btree_map("[A-Z]{1,8}", "[a-zA-Z0-9/_.-]{0,24}", 0..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn in_memory_roundtrip(
        id in id_strategy(),
        tokens_in in 0u64..1_000_000,
        requests in 0u64..100_000,
        env in env_strategy(),
    ) {
        let store = InMemoryStore::new();
        let checkpoint = build_checkpoint(id.clone(), tokens_in, requests, env);
        let agent_id = AgentId::new_unchecked(id);
        store.save(&agent_id, &checkpoint).unwrap();
        prop_assert_eq!(store.load(&agent_id).unwrap(), checkpoint);
    }

    #[test]
    fn file_roundtrip(
        id in id_strategy(),
        tokens_in in 0u64..1_000_000,
        requests in 0u64..100_000,
        env in env_strategy(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let checkpoint = build_checkpoint(id.clone(), tokens_in, requests, env);
        let agent_id = AgentId::new_unchecked(id);
        store.save(&agent_id, &checkpoint).unwrap();
        prop_assert_eq!(store.load(&agent_id).unwrap(), checkpoint);
    }

    #[test]
    fn sqlite_roundtrip(
        id in id_strategy(),
        tokens_in in 0u64..1_000_000,
        requests in 0u64..100_000,
        env in env_strategy(),
    ) {
        let store = SqliteStore::in_memory().unwrap();
        let checkpoint = build_checkpoint(id.clone(), tokens_in, requests, env);
        let agent_id = AgentId::new_unchecked(id);
        store.save(&agent_id, &checkpoint).unwrap();
        prop_assert_eq!(store.load(&agent_id).unwrap(), checkpoint);
    }
}
