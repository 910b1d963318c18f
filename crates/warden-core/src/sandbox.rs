//! The capability sandbox: per-agent grants and constraint checks.
//!
//! Grants form a forest rooted at system grants and shared through a
//! [`GrantRegistry`]. A delegated child's effective scope is the
//! intersection of its parent's scope and the requested scope, and
//! revocation removes a grant together with all of its descendants,
//! across sandboxes.

use crate::capability::Capability;
use crate::error::{WardenError, WardenResult};
use crate::hosts::{is_blocked_host, normalize_host};
use crate::identifiers::{AgentId, GrantId};
use crate::pattern::{name_pattern_matches, path_pattern_matches, pattern_covers};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Who issued a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantedBy {
    System,
    Agent(AgentId),
}

/// Optional constraints narrowing what a grant covers.
///
/// Empty pattern lists mean "unconstrained" for that dimension;
/// `operations: None` means every operation of the capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantConstraints {
    #[serde(default)]
    pub path_patterns: Vec<String>,
    #[serde(default)]
    pub blocked_path_patterns: Vec<String>,
    #[serde(default)]
    pub host_patterns: Vec<String>,
    #[serde(default)]
    pub blocked_host_patterns: Vec<String>,
    #[serde(default)]
    pub operations: Option<BTreeSet<String>>,
}

impl GrantConstraints {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn for_paths<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path_patterns: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn for_hosts<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            host_patterns: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations = Some(operations.into_iter().map(Into::into).collect());
        self
    }

    /// Intersect a parent's scope with a requested child scope.
    ///
    /// Returns the effective child constraints, or an error naming the
    /// first requested element that escapes the parent.
    pub fn intersect(parent: &Self, requested: &Self) -> Result<Self, String> {
        let path_patterns = narrow_patterns(
            &parent.path_patterns,
            &requested.path_patterns,
            pattern_covers,
            "path",
        )?;
        let host_patterns = narrow_patterns(
            &parent.host_patterns,
            &requested.host_patterns,
            host_pattern_covers,
            "host",
        )?;

        let mut blocked_path_patterns = parent.blocked_path_patterns.clone();
        for pattern in &requested.blocked_path_patterns {
            if !blocked_path_patterns.contains(pattern) {
                blocked_path_patterns.push(pattern.clone());
            }
        }
        let mut blocked_host_patterns = parent.blocked_host_patterns.clone();
        for pattern in &requested.blocked_host_patterns {
            if !blocked_host_patterns.contains(pattern) {
                blocked_host_patterns.push(pattern.clone());
            }
        }

        let operations = match (&parent.operations, &requested.operations) {
            (None, requested) => requested.clone(),
            (Some(parent_ops), None) => Some(parent_ops.clone()),
            (Some(parent_ops), Some(requested_ops)) => {
                if let Some(escaping) = requested_ops.difference(parent_ops).next() {
                    return Err(format!(
                        "operation '{escaping}' is outside the parent grant"
                    ));
                }
                Some(requested_ops.clone())
            }
        };

        Ok(Self {
            path_patterns,
            blocked_path_patterns,
            host_patterns,
            blocked_host_patterns,
            operations,
        })
    }
}

fn narrow_patterns(
    parent: &[String],
    requested: &[String],
    covers: fn(&str, &str) -> bool,
    dimension: &str,
) -> Result<Vec<String>, String> {
    if requested.is_empty() {
        return Ok(parent.to_vec());
    }
    if parent.is_empty() {
        return Ok(requested.to_vec());
    }
    for child in requested {
        if !parent.iter().any(|p| covers(p, child)) {
            return Err(format!(
                "{dimension} pattern '{child}' is outside the parent grant"
            ));
        }
    }
    Ok(requested.to_vec())
}

fn host_pattern_covers(parent: &str, child: &str) -> bool {
    if parent == "*" || parent == child {
        return true;
    }
    // A concrete child host is covered if the parent glob matches it.
    !child.contains('*') && name_pattern_matches(parent, child)
}

/// A record proving an agent holds a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub id: GrantId,
    pub capability: Capability,
    pub constraints: GrantConstraints,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: GrantedBy,
    pub delegatable: bool,
    pub parent_grant_id: Option<GrantId>,
}

impl CapabilityGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct GrantRecord {
    grant: CapabilityGrant,
    owner: AgentId,
    revoked: bool,
    children: Vec<GrantId>,
}

/// Shared registry backing every sandbox of one runtime instance.
///
/// Grants live here so that parent liveness and transitive revocation
/// work across agents; each [`Sandbox`] is an agent-scoped view.
#[derive(Debug, Default)]
pub struct GrantRegistry {
    grants: DashMap<GrantId, GrantRecord>,
}

impl GrantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, owner: AgentId, grant: CapabilityGrant) -> GrantId {
        let id = grant.id;
        if let Some(parent) = grant.parent_grant_id {
            if let Some(mut record) = self.grants.get_mut(&parent) {
                record.children.push(id);
            }
        }
        self.grants.insert(
            id,
            GrantRecord {
                grant,
                owner,
                revoked: false,
                children: Vec::new(),
            },
        );
        id
    }

    fn get(&self, id: GrantId) -> Option<CapabilityGrant> {
        self.grants.get(&id).map(|record| record.grant.clone())
    }

    /// A grant is active when neither it nor any ancestor is revoked or
    /// expired.
    fn is_active(&self, id: GrantId, now: DateTime<Utc>) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(record) = self.grants.get(&current) else {
                return false;
            };
            if record.revoked || record.grant.is_expired(now) {
                return false;
            }
            cursor = record.grant.parent_grant_id;
        }
        true
    }

    fn revoke_subtree(&self, id: GrantId) {
        let children = match self.grants.get_mut(&id) {
            Some(mut record) => {
                record.revoked = true;
                record.children.clone()
            }
            None => return,
        };
        for child in children {
            self.revoke_subtree(child);
        }
    }

    fn active_grants_for(
        &self,
        owner: &AgentId,
        capability: Capability,
        now: DateTime<Utc>,
    ) -> Vec<CapabilityGrant> {
        let mut grants: Vec<CapabilityGrant> = self
            .grants
            .iter()
            .filter(|entry| {
                entry.owner == *owner
                    && entry.grant.capability == capability
                    && self.is_active(entry.grant.id, now)
            })
            .map(|entry| entry.grant.clone())
            .collect();
        grants.sort_by_key(|g| (g.granted_at, g.id));
        grants
    }

    /// All active grants held by one agent (for checkpointing).
    pub fn grants_for_agent(&self, owner: &AgentId) -> Vec<CapabilityGrant> {
        let now = Utc::now();
        let mut grants: Vec<CapabilityGrant> = self
            .grants
            .iter()
            .filter(|entry| entry.owner == *owner && self.is_active(entry.grant.id, now))
            .map(|entry| entry.grant.clone())
            .collect();
        grants.sort_by_key(|g| (g.granted_at, g.id));
        grants
    }

    /// Drop every grant owned by an agent (terminal cleanup), revoking
    /// descendants delegated onward first.
    pub fn remove_agent(&self, owner: &AgentId) {
        let owned: Vec<GrantId> = self
            .grants
            .iter()
            .filter(|entry| entry.owner == *owner)
            .map(|entry| entry.grant.id)
            .collect();
        for id in &owned {
            self.revoke_subtree(*id);
        }
        for id in owned {
            self.grants.remove(&id);
        }
    }
}

/// Options accompanying a sandbox check.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub path: Option<PathBuf>,
    pub host: Option<String>,
    pub operation: Option<String>,
}

impl CheckOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// Outcome of a sandbox check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub grant_id: Option<GrantId>,
}

impl SandboxDecision {
    fn allowed(grant_id: GrantId) -> Self {
        Self {
            allowed: true,
            reason: None,
            grant_id: Some(grant_id),
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            grant_id: None,
        }
    }
}

/// Per-agent bundle of grants and constraint-checking primitives.
#[derive(Clone)]
pub struct Sandbox {
    agent_id: AgentId,
    registry: Arc<GrantRegistry>,
}

impl Sandbox {
    pub fn new(agent_id: AgentId, registry: Arc<GrantRegistry>) -> Self {
        Self { agent_id, registry }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Issue a system root grant to this sandbox's agent.
    pub fn grant(
        &self,
        capability: Capability,
        constraints: GrantConstraints,
        delegatable: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> GrantId {
        let grant = CapabilityGrant {
            id: GrantId::generate(),
            capability,
            constraints,
            granted_at: Utc::now(),
            expires_at,
            granted_by: GrantedBy::System,
            delegatable,
            parent_grant_id: None,
        };
        tracing::debug!(
            agent_id = %self.agent_id,
            capability = %capability,
            grant_id = %grant.id,
            "Registered root grant"
        );
        self.registry.insert(self.agent_id.clone(), grant)
    }

    /// Re-install a grant recovered from a checkpoint, keeping its id
    /// and provenance.
    pub fn adopt(&self, grant: CapabilityGrant) -> GrantId {
        self.registry.insert(self.agent_id.clone(), grant)
    }

    /// Delegate one of this agent's grants to another agent, optionally
    /// narrowing its scope. The child's effective scope is the
    /// intersection of the parent's scope and the requested scope.
    pub fn delegate(
        &self,
        parent_grant_id: GrantId,
        to_agent: &AgentId,
        narrower: Option<GrantConstraints>,
        expires_at: Option<DateTime<Utc>>,
    ) -> WardenResult<GrantId> {
        let now = Utc::now();
        let parent = self
            .registry
            .get(parent_grant_id)
            .ok_or_else(|| WardenError::NotFound {
                what: format!("grant {parent_grant_id}"),
            })?;

        let owner_matches = self
            .registry
            .grants
            .get(&parent_grant_id)
            .map(|record| record.owner == self.agent_id)
            .unwrap_or(false);
        if !owner_matches {
            return Err(WardenError::PermissionDenied {
                capability: parent.capability.wire_name().to_string(),
                reason: "cannot delegate a grant held by another agent".to_string(),
            });
        }
        if !self.registry.is_active(parent_grant_id, now) {
            return Err(WardenError::PermissionDenied {
                capability: parent.capability.wire_name().to_string(),
                reason: "parent grant is revoked or expired".to_string(),
            });
        }
        if !parent.delegatable {
            return Err(WardenError::PermissionDenied {
                capability: parent.capability.wire_name().to_string(),
                reason: "parent grant is not delegatable".to_string(),
            });
        }

        let requested = narrower.unwrap_or_default();
        let constraints = GrantConstraints::intersect(&parent.constraints, &requested)
            .map_err(|reason| WardenError::PermissionDenied {
                capability: parent.capability.wire_name().to_string(),
                reason,
            })?;

        // Child expiry never outlives the parent's.
        let expires_at = match (parent.expires_at, expires_at) {
            (Some(parent_at), Some(child_at)) => Some(parent_at.min(child_at)),
            (Some(parent_at), None) => Some(parent_at),
            (None, child_at) => child_at,
        };

        let child = CapabilityGrant {
            id: GrantId::generate(),
            capability: parent.capability,
            constraints,
            granted_at: now,
            expires_at,
            granted_by: GrantedBy::Agent(self.agent_id.clone()),
            delegatable: parent.delegatable,
            parent_grant_id: Some(parent_grant_id),
        };
        let child_id = self.registry.insert(to_agent.clone(), child);
        tracing::info!(
            from = %self.agent_id,
            to = %to_agent,
            parent = %parent_grant_id,
            child = %child_id,
            "Delegated grant"
        );
        Ok(child_id)
    }

    /// Revoke a grant and, transitively, everything delegated from it.
    pub fn revoke(&self, grant_id: GrantId) -> WardenResult<()> {
        if self.registry.get(grant_id).is_none() {
            return Err(WardenError::NotFound {
                what: format!("grant {grant_id}"),
            });
        }
        self.registry.revoke_subtree(grant_id);
        tracing::info!(agent_id = %self.agent_id, grant_id = %grant_id, "Revoked grant subtree");
        Ok(())
    }

    /// Look up an active grant for `capability` satisfying `options`.
    pub fn check(&self, capability: Capability, options: &CheckOptions) -> SandboxDecision {
        let now = Utc::now();
        let grants = self
            .registry
            .active_grants_for(&self.agent_id, capability, now);
        if grants.is_empty() {
            return SandboxDecision::denied(format!(
                "no active grant for {}",
                capability.wire_name()
            ));
        }

        let resolved_path = options.path.as_deref().map(resolve_path);
        let normalized_host = options.host.as_deref().map(normalize_host);

        if let Some(host) = &normalized_host {
            if is_blocked_host(host) {
                return SandboxDecision::denied(format!("host '{host}' is blocked by default"));
            }
        }

        let mut last_reason = None;
        for grant in &grants {
            match grant_satisfies(grant, resolved_path.as_deref(), normalized_host.as_deref(), options.operation.as_deref()) {
                Ok(()) => return SandboxDecision::allowed(grant.id),
                Err(reason) => last_reason = Some(reason),
            }
        }
        SandboxDecision::denied(last_reason.unwrap_or_else(|| "no grant covers the request".into()))
    }

    /// Path-constrained check: symlinks are resolved before matching.
    pub fn check_path_constraint(
        &self,
        capability: Capability,
        path: impl AsRef<Path>,
    ) -> SandboxDecision {
        self.check(capability, &CheckOptions::path(path.as_ref()))
    }

    /// Host-constrained check against allow/block host globs.
    pub fn check_host_constraint(&self, capability: Capability, host: &str) -> SandboxDecision {
        self.check(capability, &CheckOptions::host(host))
    }

    /// Active grants held by this agent, for checkpointing.
    pub fn snapshot_grants(&self) -> Vec<CapabilityGrant> {
        self.registry.grants_for_agent(&self.agent_id)
    }
}

fn grant_satisfies(
    grant: &CapabilityGrant,
    path: Option<&str>,
    host: Option<&str>,
    operation: Option<&str>,
) -> Result<(), String> {
    if let Some(operation) = operation {
        if let Some(operations) = &grant.constraints.operations {
            if !operations.contains(operation) {
                return Err(format!("operation '{operation}' is not granted"));
            }
        }
    }

    if let Some(path) = path {
        for blocked in &grant.constraints.blocked_path_patterns {
            if path_pattern_matches(blocked, path) {
                return Err(format!("path '{path}' matches blocked pattern '{blocked}'"));
            }
        }
        if !grant.constraints.path_patterns.is_empty()
            && !grant
                .constraints
                .path_patterns
                .iter()
                .any(|pattern| path_pattern_matches(pattern, path))
        {
            return Err(format!("path '{path}' is outside the granted patterns"));
        }
    }

    if let Some(host) = host {
        for blocked in &grant.constraints.blocked_host_patterns {
            if name_pattern_matches(blocked, host) {
                return Err(format!("host '{host}' matches blocked pattern '{blocked}'"));
            }
        }
        if !grant.constraints.host_patterns.is_empty()
            && !grant
                .constraints
                .host_patterns
                .iter()
                .any(|pattern| name_pattern_matches(pattern, host))
        {
            return Err(format!("host '{host}' is outside the granted patterns"));
        }
    }

    Ok(())
}

/// Resolve symlinks where the path exists; otherwise normalize away
/// `.` and `..` components lexically so constraint matching still sees
/// a canonical shape.
fn resolve_path(path: &Path) -> String {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical.to_string_lossy().into_owned();
    }
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in path.components() {
        match component {
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Prefix(prefix) => {
                parts.push(prefix.as_os_str().to_string_lossy().into_owned())
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}
