use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::config::RateLimiterConfig;
use crate::counter_store::{CounterStore, EvalOutcome};
use crate::domain::{LimitKind, ThrottleType};
use crate::error::Error;
use crate::rate_limit::classifier;
use crate::rate_limit::limits::{self, EffectiveLimit};
use crate::rate_limit::subscription::SubscriptionResolver;
use crate::subscription_store::SubscriptionStore;

/// Outcome of one admission decision, with the metadata the filter needs for
/// headers and the 429 body.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Ceiling of the representative limit (most restrictive client limit on
    /// admit, the failed limit on deny). 0 = no representative ceiling.
    pub limit: u64,
    pub current: u64,
    pub remaining: u64,
    pub retry_after_seconds: i64,
    /// Which limit kind was exceeded. None when allowed, and also None on the
    /// no-subscription denial.
    pub exceeded_kind: Option<LimitKind>,
    /// count / ceiling of the global counter when one was evaluated.
    pub global_usage_ratio: Option<f64>,
    pub throttle: ThrottleType,
    pub soft_delay_ms: u64,
}

impl RateLimitResult {
    /// Denial for a client without a usable subscription. Counters untouched.
    fn subscription_required() -> Self {
        Self {
            allowed: false,
            limit: 0,
            current: 0,
            remaining: 0,
            retry_after_seconds: 0,
            exceeded_kind: None,
            global_usage_ratio: None,
            throttle: ThrottleType::Hard,
            soft_delay_ms: 0,
        }
    }

    /// Unconditional admission when no limit applies.
    fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: 0,
            current: 0,
            remaining: u64::MAX,
            retry_after_seconds: 0,
            exceeded_kind: None,
            global_usage_ratio: None,
            throttle: ThrottleType::None,
            soft_delay_ms: 0,
        }
    }
}

/// The admission decision pipeline: subscription resolution, effective-limit
/// assembly, the atomic multi-limit evaluation, and throttle classification.
/// Shared by every gateway instance through the counter store; holds no
/// mutable state of its own.
pub struct DistributedRateLimiter {
    counter_store: Arc<dyn CounterStore>,
    subscription_store: Arc<dyn SubscriptionStore>,
    resolver: SubscriptionResolver,
    config: RateLimiterConfig,
}

impl DistributedRateLimiter {
    pub fn new(
        counter_store: Arc<dyn CounterStore>,
        subscription_store: Arc<dyn SubscriptionStore>,
        config: RateLimiterConfig,
    ) -> Self {
        let resolver = SubscriptionResolver::new(counter_store.clone(), subscription_store.clone());
        Self {
            counter_store,
            subscription_store,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Atomically check and consume one request for the given client.
    ///
    /// Within one call the subscription lookup happens before limit assembly,
    /// which happens before the evaluator round trip; the counter store
    /// serializes concurrent evaluations across instances.
    pub async fn try_consume(&self, client_id: Uuid) -> Result<RateLimitResult, Error> {
        let now = Utc::now();

        let Some(plan) = self.resolver.resolve(client_id, now).await? else {
            debug!(client_id = %client_id, "Denying request without an active subscription");
            return Ok(RateLimitResult::subscription_required());
        };

        let rules = self.subscription_store.active_global_rules().await?;
        let limits = limits::resolve(client_id, &plan, &rules);
        if limits.is_empty() {
            return Ok(RateLimitResult::unlimited());
        }

        let keys: Vec<String> = limits.iter().map(|l| l.counter_key(now)).collect();
        let ceilings: Vec<u64> = limits.iter().map(EffectiveLimit::ceiling).collect();
        let ttls: Vec<i64> = limits.iter().map(|l| l.ttl_seconds(now)).collect();

        match self
            .counter_store
            .check_and_increment(&keys, &ceilings, &ttls)
            .await?
        {
            EvalOutcome::Admitted {
                counts,
                max_ttl_seconds,
            } => Ok(Self::admitted_result(&limits, &counts, max_ttl_seconds)),
            EvalOutcome::Denied {
                failed_index,
                current,
                ceiling,
                retry_after_seconds,
            } => {
                let failed = &limits[failed_index];
                debug!(
                    client_id = %client_id,
                    limit_kind = %failed.kind(),
                    current,
                    ceiling,
                    "Rate limit exceeded"
                );
                let global_usage_ratio = (failed.kind() == LimitKind::Global && ceiling > 0)
                    .then(|| current as f64 / ceiling as f64);
                let (throttle, soft_delay_ms) =
                    classifier::classify(&self.config, failed.kind(), global_usage_ratio);
                Ok(RateLimitResult {
                    allowed: false,
                    limit: ceiling,
                    current,
                    remaining: 0,
                    retry_after_seconds,
                    exceeded_kind: Some(failed.kind()),
                    global_usage_ratio,
                    throttle,
                    soft_delay_ms,
                })
            }
        }
    }

    fn admitted_result(
        limits: &[EffectiveLimit],
        counts: &[u64],
        max_ttl_seconds: i64,
    ) -> RateLimitResult {
        // Representative ceiling for the success headers: the client limit
        // with the least headroom after this increment.
        let representative = limits
            .iter()
            .zip(counts)
            .filter(|(limit, _)| limit.is_client_limit())
            .map(|(limit, count)| (limit.ceiling(), *count, limit.ceiling().saturating_sub(*count)))
            .min_by_key(|(_, _, remaining)| *remaining);

        let global_usage_ratio = limits
            .iter()
            .zip(counts)
            .find(|(limit, _)| limit.kind() == LimitKind::Global && limit.ceiling() > 0)
            .map(|(limit, count)| *count as f64 / limit.ceiling() as f64);

        let (limit, current, remaining) = representative.unwrap_or((0, 0, u64::MAX));

        RateLimitResult {
            allowed: true,
            limit,
            current,
            remaining,
            retry_after_seconds: max_ttl_seconds,
            exceeded_kind: None,
            global_usage_ratio,
            throttle: ThrottleType::None,
            soft_delay_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter_store::MemoryCounterStore;
    use crate::domain::{Client, RateLimitRule, SubscriptionPlan};
    use crate::rate_limit::bucket;
    use crate::subscription_store::{MemoryStore, SubscriptionStore as _};

    struct Fixture {
        counter: Arc<MemoryCounterStore>,
        store: Arc<MemoryStore>,
        limiter: DistributedRateLimiter,
    }

    fn fixture(config: RateLimiterConfig) -> Fixture {
        let counter = Arc::new(MemoryCounterStore::new());
        let store = Arc::new(MemoryStore::new());
        let limiter =
            DistributedRateLimiter::new(counter.clone(), store.clone(), config);
        Fixture {
            counter,
            store,
            limiter,
        }
    }

    async fn seed_client(
        store: &MemoryStore,
        monthly: i64,
        window: Option<(i64, i32)>,
    ) -> Uuid {
        let plan = SubscriptionPlan {
            id: Uuid::new_v4(),
            name: format!("plan-{}", Uuid::new_v4()),
            monthly_limit: monthly,
            window_limit: window.map(|(l, _)| l),
            window_seconds: window.map(|(_, s)| s),
            active: true,
            expires_at: None,
            created_at: Utc::now(),
        };
        store.create_plan(plan.clone()).await.unwrap();
        let client = Client {
            id: Uuid::new_v4(),
            name: "client".to_string(),
            api_key: format!("rk_{}", Uuid::new_v4().simple()),
            subscription_plan_id: plan.id,
            active: true,
            created_at: Utc::now(),
        };
        store.create_client(client.clone()).await.unwrap();
        client.id
    }

    async fn seed_global_rule(store: &MemoryStore, limit: i64, window_seconds: Option<i32>) {
        store
            .create_rule(RateLimitRule {
                id: Uuid::new_v4(),
                limit_type: LimitKind::Global,
                limit_value: limit,
                global_window_seconds: window_seconds,
                active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_admit_under_monthly_plan() {
        let f = fixture(RateLimiterConfig::default());
        let client_id = seed_client(&f.store, 100, None).await;

        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.limit, 100);
        assert_eq!(result.remaining, 99);
        assert_eq!(result.throttle, ThrottleType::None);

        let key = bucket::client_monthly_key(client_id, Utc::now());
        let snapshot = f.counter.peek_counter(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.count, 1);
        assert!(snapshot.ttl_seconds > 0);
    }

    #[tokio::test]
    async fn test_window_denial_is_hard() {
        let f = fixture(RateLimiterConfig::default());
        let client_id = seed_client(&f.store, 10_000, Some((5, 60))).await;

        for _ in 0..5 {
            assert!(f.limiter.try_consume(client_id).await.unwrap().allowed);
        }
        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.exceeded_kind, Some(LimitKind::Window));
        assert_eq!(result.throttle, ThrottleType::Hard);
        assert_eq!(result.soft_delay_ms, 0);
        assert!(result.retry_after_seconds >= 1 && result.retry_after_seconds <= 60);

        // Denial must not advance the monthly counter.
        let monthly = bucket::client_monthly_key(client_id, Utc::now());
        let snapshot = f.counter.peek_counter(&monthly).await.unwrap().unwrap();
        assert_eq!(snapshot.count, 5);
    }

    #[tokio::test]
    async fn test_global_denial_reports_global_even_with_exhausted_window() {
        let f = fixture(RateLimiterConfig::default());
        let client_id = seed_client(&f.store, 10_000, Some((1, 60))).await;
        seed_global_rule(&f.store, 1, Some(60)).await;

        assert!(f.limiter.try_consume(client_id).await.unwrap().allowed);
        // Both the global and window ceilings are exhausted; the global one
        // is checked first and must be the one reported.
        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.exceeded_kind, Some(LimitKind::Global));
    }

    #[tokio::test]
    async fn test_no_subscription_denies_hard_without_touching_counters() {
        let f = fixture(RateLimiterConfig::default());
        let client_id = Uuid::new_v4();

        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.exceeded_kind, None);
        assert_eq!(result.throttle, ThrottleType::Hard);

        let key = bucket::client_monthly_key(client_id, Utc::now());
        assert!(f.counter.peek_counter(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_throttle_in_global_band() {
        let config = RateLimiterConfig {
            throttling: crate::config::ThrottlingMode::Soft,
            soft_delay_ms: 500,
            ..Default::default()
        };
        let f = fixture(config);
        let client_id = seed_client(&f.store, 0, None).await;
        seed_global_rule(&f.store, 100, Some(60)).await;

        // Pre-seed the global counter to its ceiling.
        let key = bucket::global_window_key(60, Utc::now());
        f.counter.set_value(&key, "100", 60).await.unwrap();

        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.exceeded_kind, Some(LimitKind::Global));
        assert_eq!(result.throttle, ThrottleType::Soft);
        assert_eq!(result.soft_delay_ms, 500);
        assert_eq!(result.global_usage_ratio, Some(1.0));
    }

    #[tokio::test]
    async fn test_hard_throttle_past_global_hard_threshold() {
        let config = RateLimiterConfig {
            throttling: crate::config::ThrottlingMode::Soft,
            soft_delay_ms: 500,
            ..Default::default()
        };
        let f = fixture(config);
        let client_id = seed_client(&f.store, 0, None).await;
        seed_global_rule(&f.store, 100, Some(60)).await;

        let key = bucket::global_window_key(60, Utc::now());
        f.counter.set_value(&key, "120", 60).await.unwrap();

        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.throttle, ThrottleType::Hard);
        assert_eq!(result.soft_delay_ms, 0);
    }

    #[tokio::test]
    async fn test_global_ratio_reported_on_admission() {
        let f = fixture(RateLimiterConfig::default());
        let client_id = seed_client(&f.store, 1000, None).await;
        seed_global_rule(&f.store, 100, Some(60)).await;

        let key = bucket::global_window_key(60, Utc::now());
        f.counter.set_value(&key, "90", 60).await.unwrap();

        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.global_usage_ratio, Some(0.91));
    }

    #[tokio::test]
    async fn test_zero_monthly_limit_is_disabled() {
        let f = fixture(RateLimiterConfig::default());
        let client_id = seed_client(&f.store, 0, None).await;

        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.limit, 0);
        assert_eq!(result.remaining, u64::MAX);
    }

    #[tokio::test]
    async fn test_counter_store_outage_propagates() {
        let f = fixture(RateLimiterConfig::default());
        let client_id = seed_client(&f.store, 100, None).await;
        f.counter.set_unavailable(true);

        assert!(f.limiter.try_consume(client_id).await.is_err());
    }

    #[tokio::test]
    async fn test_representative_limit_is_most_restrictive() {
        let f = fixture(RateLimiterConfig::default());
        let client_id = seed_client(&f.store, 10_000, Some((5, 60))).await;

        let result = f.limiter.try_consume(client_id).await.unwrap();
        assert!(result.allowed);
        // The window limit (5, now 4 remaining) is tighter than the monthly.
        assert_eq!(result.limit, 5);
        assert_eq!(result.remaining, 4);
    }
}
