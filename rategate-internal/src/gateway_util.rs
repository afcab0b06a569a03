use std::sync::Arc;

use crate::config::Config;
use crate::counter_store::CounterStore;
use crate::rate_limit::DistributedRateLimiter;
use crate::subscription_store::SubscriptionStore;

/// Shared application state handed to every handler and middleware layer.
/// Read-only after startup; all mutable state lives in the two stores.
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub counter_store: Arc<dyn CounterStore>,
    pub subscription_store: Arc<dyn SubscriptionStore>,
    pub rate_limiter: Arc<DistributedRateLimiter>,
}

impl AppStateData {
    pub fn new(
        config: Config,
        counter_store: Arc<dyn CounterStore>,
        subscription_store: Arc<dyn SubscriptionStore>,
    ) -> Self {
        let rate_limiter = Arc::new(DistributedRateLimiter::new(
            counter_store.clone(),
            subscription_store.clone(),
            config.rate_limiter.clone(),
        ));
        Self {
            config: Arc::new(config),
            counter_store,
            subscription_store,
            rate_limiter,
        }
    }
}
