use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Client, RateLimitRule, SubscriptionPlan};
use crate::error::{Error, ErrorDetails};
use crate::subscription_store::SubscriptionStore;

/// Postgres-backed subscription store. Writes come from the admin surface;
/// the admission path reads through the subscription cache in front of this.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to connect to Postgres: {e}"),
                })
            })?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to run database migrations: {e}"),
            })
        })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_error(e: sqlx::Error) -> Error {
    Error::new(ErrorDetails::SubscriptionStore {
        message: e.to_string(),
    })
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn find_client_by_api_key(&self, api_key: &str) -> Result<Option<Client>, Error> {
        sqlx::query_as::<_, Client>(
            "SELECT id, name, api_key, subscription_plan_id, active, created_at \
             FROM clients WHERE api_key = $1",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn find_plan_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Option<SubscriptionPlan>, Error> {
        sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT p.id, p.name, p.monthly_limit, p.window_limit, p.window_seconds, \
                    p.active, p.expires_at, p.created_at \
             FROM subscription_plans p \
             JOIN clients c ON c.subscription_plan_id = p.id \
             WHERE c.id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn active_global_rules(&self) -> Result<Vec<RateLimitRule>, Error> {
        sqlx::query_as::<_, RateLimitRule>(
            "SELECT id, limit_type, limit_value, global_window_seconds, active, created_at \
             FROM rate_limit_rules WHERE active AND limit_type = 'GLOBAL' \
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn create_plan(&self, plan: SubscriptionPlan) -> Result<SubscriptionPlan, Error> {
        sqlx::query(
            "INSERT INTO subscription_plans \
             (id, name, monthly_limit, window_limit, window_seconds, active, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(plan.monthly_limit)
        .bind(plan.window_limit)
        .bind(plan.window_seconds)
        .bind(plan.active)
        .bind(plan.expires_at)
        .bind(plan.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(plan)
    }

    async fn update_plan(&self, plan: SubscriptionPlan) -> Result<SubscriptionPlan, Error> {
        let result = sqlx::query(
            "UPDATE subscription_plans \
             SET name = $2, monthly_limit = $3, window_limit = $4, window_seconds = $5, \
                 active = $6, expires_at = $7 \
             WHERE id = $1",
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(plan.monthly_limit)
        .bind(plan.window_limit)
        .bind(plan.window_seconds)
        .bind(plan.active)
        .bind(plan.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::new(ErrorDetails::NotFound {
                message: format!("Plan not found: {}", plan.id),
            }));
        }
        Ok(plan)
    }

    async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>, Error> {
        sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT id, name, monthly_limit, window_limit, window_seconds, active, expires_at, created_at \
             FROM subscription_plans ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn find_plan(&self, id: Uuid) -> Result<Option<SubscriptionPlan>, Error> {
        sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT id, name, monthly_limit, window_limit, window_seconds, active, expires_at, created_at \
             FROM subscription_plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn find_plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>, Error> {
        sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT id, name, monthly_limit, window_limit, window_seconds, active, expires_at, created_at \
             FROM subscription_plans WHERE LOWER(name) = LOWER($1)",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn create_client(&self, client: Client) -> Result<Client, Error> {
        sqlx::query(
            "INSERT INTO clients (id, name, api_key, subscription_plan_id, active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(client.id)
        .bind(&client.name)
        .bind(&client.api_key)
        .bind(client.subscription_plan_id)
        .bind(client.active)
        .bind(client.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(client)
    }

    async fn list_clients(&self) -> Result<Vec<Client>, Error> {
        sqlx::query_as::<_, Client>(
            "SELECT id, name, api_key, subscription_plan_id, active, created_at \
             FROM clients ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn find_client(&self, id: Uuid) -> Result<Option<Client>, Error> {
        sqlx::query_as::<_, Client>(
            "SELECT id, name, api_key, subscription_plan_id, active, created_at \
             FROM clients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn clients_for_plan(&self, plan_id: Uuid) -> Result<Vec<Client>, Error> {
        sqlx::query_as::<_, Client>(
            "SELECT id, name, api_key, subscription_plan_id, active, created_at \
             FROM clients WHERE subscription_plan_id = $1",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn create_rule(&self, rule: RateLimitRule) -> Result<RateLimitRule, Error> {
        sqlx::query(
            "INSERT INTO rate_limit_rules \
             (id, limit_type, limit_value, global_window_seconds, active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(rule.id)
        .bind(rule.limit_type)
        .bind(rule.limit_value)
        .bind(rule.global_window_seconds)
        .bind(rule.active)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(rule)
    }

    async fn update_rule(&self, rule: RateLimitRule) -> Result<RateLimitRule, Error> {
        let result = sqlx::query(
            "UPDATE rate_limit_rules \
             SET limit_value = $2, global_window_seconds = $3, active = $4 \
             WHERE id = $1",
        )
        .bind(rule.id)
        .bind(rule.limit_value)
        .bind(rule.global_window_seconds)
        .bind(rule.active)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::new(ErrorDetails::NotFound {
                message: format!("Rule not found: {}", rule.id),
            }));
        }
        Ok(rule)
    }

    async fn list_rules(&self) -> Result<Vec<RateLimitRule>, Error> {
        sqlx::query_as::<_, RateLimitRule>(
            "SELECT id, limit_type, limit_value, global_window_seconds, active, created_at \
             FROM rate_limit_rules ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)
    }

    async fn find_rule(&self, id: Uuid) -> Result<Option<RateLimitRule>, Error> {
        sqlx::query_as::<_, RateLimitRule>(
            "SELECT id, limit_type, limit_value, global_window_seconds, active, created_at \
             FROM rate_limit_rules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)
    }
}
