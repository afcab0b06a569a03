//! Subscription resolution with a cache-aside layer in the counter store.
//!
//! The cache keeps the hot path off the durable store: a positive entry is
//! the serialized plan with a TTL derived from the plan's expiry (half the
//! remaining validity, clamped), a negative entry is the literal `EXPIRED`
//! sentinel held briefly so a client hammering with a revoked key cannot
//! thrash the database.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::counter_store::CounterStore;
use crate::domain::SubscriptionPlan;
use crate::error::Error;
use crate::rate_limit::bucket;
use crate::subscription_store::SubscriptionStore;

pub const EXPIRED_SENTINEL: &str = "EXPIRED";

const NEGATIVE_CACHE_TTL_SECONDS: i64 = 300;
const DEFAULT_CACHE_TTL_SECONDS: i64 = 3600;
const MIN_CACHE_TTL_SECONDS: i64 = 60;

pub struct SubscriptionResolver {
    counter_store: Arc<dyn CounterStore>,
    subscription_store: Arc<dyn SubscriptionStore>,
}

impl SubscriptionResolver {
    pub fn new(
        counter_store: Arc<dyn CounterStore>,
        subscription_store: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            counter_store,
            subscription_store,
        }
    }

    /// Resolve a client id to its currently effective plan, or `None` when
    /// the client has no usable subscription.
    pub async fn resolve(
        &self,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionPlan>, Error> {
        let cache_key = bucket::subscription_cache_key(client_id);

        if let Some(cached) = self.counter_store.get_value(&cache_key).await? {
            if cached == EXPIRED_SENTINEL {
                debug!(client_id = %client_id, "Subscription cache hit (expired sentinel)");
                return Ok(None);
            }
            match serde_json::from_str::<SubscriptionPlan>(&cached) {
                Ok(plan) => {
                    debug!(client_id = %client_id, "Subscription cache hit");
                    if !plan.is_effectively_active(now) {
                        // The cached copy outlived the plan; flip to the sentinel.
                        self.cache_expired(&cache_key).await?;
                        return Ok(None);
                    }
                    return Ok(Some(plan));
                }
                Err(e) => {
                    warn!(client_id = %client_id, "Failed to deserialize cached subscription: {e}");
                    // Fall through to the durable store.
                }
            }
        }

        debug!(client_id = %client_id, "Subscription cache miss, fetching from store");
        let plan = self.subscription_store.find_plan_for_client(client_id).await?;

        let Some(plan) = plan else {
            self.cache_expired(&cache_key).await?;
            return Ok(None);
        };

        if !plan.is_effectively_active(now) {
            self.cache_expired(&cache_key).await?;
            return Ok(None);
        }

        self.cache_plan(&cache_key, &plan, now).await?;
        Ok(Some(plan))
    }

    async fn cache_expired(&self, cache_key: &str) -> Result<(), Error> {
        self.counter_store
            .set_value(cache_key, EXPIRED_SENTINEL, NEGATIVE_CACHE_TTL_SECONDS)
            .await
    }

    async fn cache_plan(
        &self,
        cache_key: &str,
        plan: &SubscriptionPlan,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let serialized = match serde_json::to_string(plan) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize subscription plan for caching: {e}");
                return Ok(());
            }
        };
        let ttl = cache_ttl_seconds(plan, now);
        self.counter_store.set_value(cache_key, &serialized, ttl).await?;
        debug!(ttl_seconds = ttl, "Cached subscription plan");
        Ok(())
    }
}

/// TTL for a positive cache entry: half the remaining validity, clamped to
/// [60, 3600]. A plan with no expiry gets the full hour; a plan that just
/// expired is held for a minute so its denial is cheap.
fn cache_ttl_seconds(plan: &SubscriptionPlan, now: DateTime<Utc>) -> i64 {
    let Some(expires_at) = plan.expires_at else {
        return DEFAULT_CACHE_TTL_SECONDS;
    };
    let remaining = (expires_at - now).num_seconds();
    if remaining <= 0 {
        return MIN_CACHE_TTL_SECONDS;
    }
    (remaining / 2).clamp(MIN_CACHE_TTL_SECONDS, DEFAULT_CACHE_TTL_SECONDS)
}
