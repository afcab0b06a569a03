//! Durable relational store for plans, clients, and global rules.
//!
//! The admission path only reads from this store (and only on subscription
//! cache misses); the admin surface writes to it. The trait is the seam
//! between the two backends: Postgres for deployments, an in-process map for
//! tests and local development.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Client, RateLimitRule, SubscriptionPlan};
use crate::error::Error;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    // Hot path
    async fn find_client_by_api_key(&self, api_key: &str) -> Result<Option<Client>, Error>;
    async fn find_plan_for_client(&self, client_id: Uuid) -> Result<Option<SubscriptionPlan>, Error>;
    async fn active_global_rules(&self) -> Result<Vec<RateLimitRule>, Error>;

    // Plans
    async fn create_plan(&self, plan: SubscriptionPlan) -> Result<SubscriptionPlan, Error>;
    async fn update_plan(&self, plan: SubscriptionPlan) -> Result<SubscriptionPlan, Error>;
    async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>, Error>;
    async fn find_plan(&self, id: Uuid) -> Result<Option<SubscriptionPlan>, Error>;
    async fn find_plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>, Error>;

    // Clients
    async fn create_client(&self, client: Client) -> Result<Client, Error>;
    async fn list_clients(&self) -> Result<Vec<Client>, Error>;
    async fn find_client(&self, id: Uuid) -> Result<Option<Client>, Error>;
    async fn clients_for_plan(&self, plan_id: Uuid) -> Result<Vec<Client>, Error>;

    // Global rules
    async fn create_rule(&self, rule: RateLimitRule) -> Result<RateLimitRule, Error>;
    async fn update_rule(&self, rule: RateLimitRule) -> Result<RateLimitRule, Error>;
    async fn list_rules(&self) -> Result<Vec<RateLimitRule>, Error>;
    async fn find_rule(&self, id: Uuid) -> Result<Option<RateLimitRule>, Error>;
}

const DEFAULT_PLAN_NAME: &str = "Default";
const DEFAULT_MONTHLY_LIMIT: i64 = 1_000;

/// Ensure the default subscription plan exists, so freshly provisioned
/// deployments can create clients immediately. Runs once at startup.
pub async fn ensure_default_plan(store: &dyn SubscriptionStore) -> Result<SubscriptionPlan, Error> {
    if let Some(plan) = store.find_plan_by_name(DEFAULT_PLAN_NAME).await? {
        return Ok(plan);
    }
    let plan = SubscriptionPlan {
        id: Uuid::new_v4(),
        name: DEFAULT_PLAN_NAME.to_string(),
        monthly_limit: DEFAULT_MONTHLY_LIMIT,
        window_limit: None,
        window_seconds: None,
        active: true,
        expires_at: None,
        created_at: chrono::Utc::now(),
    };
    let plan = store.create_plan(plan).await?;
    tracing::info!(
        plan = %plan.name,
        monthly_limit = plan.monthly_limit,
        "Created default subscription plan"
    );
    Ok(plan)
}
