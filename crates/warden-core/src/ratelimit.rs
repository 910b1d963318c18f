//! Admission control: continuous-refill token buckets per agent and
//! bucket kind.
//!
//! Buckets are independent; consumption is not atomic across buckets.
//! Callers needing multi-bucket atomicity check every bucket with
//! `peek` before consuming any. Buckets are not persisted: after a
//! restart they refill to capacity, which over-admits briefly instead
//! of over-counting after downtime.

use crate::identifiers::AgentId;
use crate::manifest::AgentLimits;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// The bucket kinds the runtime accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketKind {
    RequestsPerMinute,
    ToolCallsPerMinute,
    TokensPerMinute,
    CostPerMinute,
}

impl BucketKind {
    pub const ALL: [BucketKind; 4] = [
        BucketKind::RequestsPerMinute,
        BucketKind::ToolCallsPerMinute,
        BucketKind::TokensPerMinute,
        BucketKind::CostPerMinute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::RequestsPerMinute => "requests-per-minute",
            BucketKind::ToolCallsPerMinute => "tool-calls-per-minute",
            BucketKind::TokensPerMinute => "tokens-per-minute",
            BucketKind::CostPerMinute => "cost-per-minute",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capacity and refill rate for one bucket kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub capacity: u64,
    pub refill_per_minute: u64,
}

impl BucketConfig {
    pub fn per_minute(rate: u64) -> Self {
        Self {
            capacity: rate,
            refill_per_minute: rate,
        }
    }
}

/// Outcome of a consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct TokenBucket {
    config: BucketConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: config.capacity as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.duration_since(self.last_refill).as_millis() as f64;
        let refilled = elapsed_ms * self.config.refill_per_minute as f64 / 60_000.0;
        self.tokens = (self.tokens + refilled).min(self.config.capacity as f64);
        self.last_refill = now;
    }

    fn try_consume(&mut self, n: u64, now: Instant) -> ConsumeOutcome {
        self.refill(now);
        let wanted = n as f64;
        if self.tokens >= wanted {
            self.tokens -= wanted;
            ConsumeOutcome {
                allowed: true,
                remaining: self.tokens as u64,
                retry_after_ms: None,
            }
        } else {
            let deficit = wanted - self.tokens;
            let retry_after_ms = if self.config.refill_per_minute == 0 {
                None
            } else {
                Some((deficit * 60_000.0 / self.config.refill_per_minute as f64).ceil() as u64)
            };
            ConsumeOutcome {
                allowed: false,
                remaining: self.tokens as u64,
                retry_after_ms,
            }
        }
    }
}

/// Token-bucket rate limiter keyed by `(agent, bucket kind)`.
pub struct RateLimiter {
    defaults: fn(BucketKind) -> BucketConfig,
    overrides: DashMap<(AgentId, BucketKind), BucketConfig>,
    buckets: DashMap<(AgentId, BucketKind), TokenBucket>,
}

fn default_config(kind: BucketKind) -> BucketConfig {
    let limits = AgentLimits::default();
    match kind {
        BucketKind::RequestsPerMinute => BucketConfig::per_minute(limits.requests_per_minute as u64),
        BucketKind::ToolCallsPerMinute => {
            BucketConfig::per_minute(limits.tool_calls_per_minute as u64)
        }
        BucketKind::TokensPerMinute => BucketConfig::per_minute(limits.tokens_per_minute as u64),
        BucketKind::CostPerMinute => BucketConfig::per_minute(limits.cost_per_minute_micros),
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            defaults: default_config,
            overrides: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Apply an agent's manifest limits as its bucket configuration.
    /// Existing buckets for the agent are rebuilt at next access.
    pub fn configure_agent(&self, agent_id: &AgentId, limits: &AgentLimits) {
        let configs = [
            (
                BucketKind::RequestsPerMinute,
                BucketConfig::per_minute(limits.requests_per_minute as u64),
            ),
            (
                BucketKind::ToolCallsPerMinute,
                BucketConfig::per_minute(limits.tool_calls_per_minute as u64),
            ),
            (
                BucketKind::TokensPerMinute,
                BucketConfig::per_minute(limits.tokens_per_minute as u64),
            ),
            (
                BucketKind::CostPerMinute,
                BucketConfig::per_minute(limits.cost_per_minute_micros),
            ),
        ];
        for (kind, config) in configs {
            self.overrides.insert((agent_id.clone(), kind), config);
            self.buckets.remove(&(agent_id.clone(), kind));
        }
    }

    fn config_for(&self, agent_id: &AgentId, kind: BucketKind) -> BucketConfig {
        self.overrides
            .get(&(agent_id.clone(), kind))
            .map(|entry| *entry)
            .unwrap_or_else(|| (self.defaults)(kind))
    }

    /// Attempt to take `n` tokens from one bucket.
    pub fn try_consume(&self, agent_id: &AgentId, kind: BucketKind, n: u64) -> ConsumeOutcome {
        self.consume_at(agent_id, kind, n, Instant::now())
    }

    fn consume_at(
        &self,
        agent_id: &AgentId,
        kind: BucketKind,
        n: u64,
        now: Instant,
    ) -> ConsumeOutcome {
        let key = (agent_id.clone(), kind);
        let config = self.config_for(agent_id, kind);
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(config, now));
        let outcome = bucket.try_consume(n, now);
        if !outcome.allowed {
            tracing::debug!(
                agent_id = %agent_id,
                bucket = %kind,
                requested = n,
                remaining = outcome.remaining,
                "Rate limit exceeded"
            );
        }
        outcome
    }

    /// Remaining tokens after refill, without consuming.
    pub fn peek(&self, agent_id: &AgentId, kind: BucketKind) -> u64 {
        let now = Instant::now();
        let key = (agent_id.clone(), kind);
        let config = self.config_for(agent_id, kind);
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(config, now));
        bucket.refill(now);
        bucket.tokens as u64
    }

    /// Reset one bucket, or every bucket of the agent when `kind` is
    /// `None`. Reset buckets start full.
    pub fn reset(&self, agent_id: &AgentId, kind: Option<BucketKind>) {
        match kind {
            Some(kind) => {
                self.buckets.remove(&(agent_id.clone(), kind));
            }
            None => {
                self.buckets
                    .retain(|(owner, _), _| owner != agent_id);
            }
        }
    }

    /// Shift a bucket's refill clock backwards, simulating elapsed time.
    #[doc(hidden)]
    pub fn advance_for_test(&self, agent_id: &AgentId, kind: BucketKind, by: Duration) {
        if let Some(mut bucket) = self.buckets.get_mut(&(agent_id.clone(), kind)) {
            bucket.last_refill -= by;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::new_unchecked("a")
    }

    #[test]
    fn consume_within_capacity_is_allowed() {
        let limiter = RateLimiter::new();
        limiter.configure_agent(
            &agent(),
            &AgentLimits {
                requests_per_minute: 5,
                ..AgentLimits::default()
            },
        );
        let outcome = limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 3);
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, 2);
    }

    #[test]
    fn exhausted_bucket_reports_retry_after() {
        let limiter = RateLimiter::new();
        limiter.configure_agent(
            &agent(),
            &AgentLimits {
                requests_per_minute: 5,
                ..AgentLimits::default()
            },
        );
        assert!(limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 5).allowed);
        let outcome = limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 1);
        assert!(!outcome.allowed);
        // One token refills in 60000/5 = 12000ms.
        let retry = outcome.retry_after_ms.unwrap();
        assert!(retry > 0 && retry <= 12_000);
    }

    #[test]
    fn refill_restores_tokens_over_time() {
        let limiter = RateLimiter::new();
        limiter.configure_agent(
            &agent(),
            &AgentLimits {
                requests_per_minute: 60,
                ..AgentLimits::default()
            },
        );
        // Capacity 5 via custom bucket: use tokens bucket with rate 60 and
        // drain capacity first.
        assert!(
            limiter
                .try_consume(&agent(), BucketKind::RequestsPerMinute, 60)
                .allowed
        );
        assert!(!limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 1).allowed);

        // 1 second at 60/min refills one token.
        limiter.advance_for_test(&agent(), BucketKind::RequestsPerMinute, Duration::from_secs(1));
        let outcome = limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 1);
        assert!(outcome.allowed);
        assert_eq!(limiter.peek(&agent(), BucketKind::RequestsPerMinute), 0);
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let limiter = RateLimiter::new();
        limiter.configure_agent(
            &agent(),
            &AgentLimits {
                requests_per_minute: 10,
                ..AgentLimits::default()
            },
        );
        limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 1);
        limiter.advance_for_test(
            &agent(),
            BucketKind::RequestsPerMinute,
            Duration::from_secs(3600),
        );
        assert_eq!(limiter.peek(&agent(), BucketKind::RequestsPerMinute), 10);
    }

    #[test]
    fn buckets_are_independent() {
        let limiter = RateLimiter::new();
        limiter.configure_agent(
            &agent(),
            &AgentLimits {
                requests_per_minute: 1,
                tool_calls_per_minute: 100,
                ..AgentLimits::default()
            },
        );
        assert!(limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 1).allowed);
        assert!(!limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 1).allowed);
        assert!(limiter.try_consume(&agent(), BucketKind::ToolCallsPerMinute, 1).allowed);
    }

    #[test]
    fn reset_refills_to_capacity() {
        let limiter = RateLimiter::new();
        limiter.configure_agent(
            &agent(),
            &AgentLimits {
                requests_per_minute: 4,
                ..AgentLimits::default()
            },
        );
        limiter.try_consume(&agent(), BucketKind::RequestsPerMinute, 4);
        limiter.reset(&agent(), Some(BucketKind::RequestsPerMinute));
        assert_eq!(limiter.peek(&agent(), BucketKind::RequestsPerMinute), 4);
    }

    #[test]
    fn agents_do_not_share_buckets() {
        let limiter = RateLimiter::new();
        let a = AgentId::new_unchecked("a");
        let b = AgentId::new_unchecked("b");
        limiter.configure_agent(
            &a,
            &AgentLimits {
                requests_per_minute: 1,
                ..AgentLimits::default()
            },
        );
        limiter.configure_agent(
            &b,
            &AgentLimits {
                requests_per_minute: 1,
                ..AgentLimits::default()
            },
        );
        assert!(limiter.try_consume(&a, BucketKind::RequestsPerMinute, 1).allowed);
        assert!(limiter.try_consume(&b, BucketKind::RequestsPerMinute, 1).allowed);
    }
}
