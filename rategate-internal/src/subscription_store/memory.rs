use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Client, LimitKind, RateLimitRule, SubscriptionPlan};
use crate::error::{Error, ErrorDetails};
use crate::subscription_store::SubscriptionStore;

#[derive(Debug, Default)]
struct Inner {
    plans: HashMap<Uuid, SubscriptionPlan>,
    clients: HashMap<Uuid, Client>,
    rules: HashMap<Uuid, RateLimitRule>,
}

/// In-process subscription store for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find_client_by_api_key(&self, api_key: &str) -> Result<Option<Client>, Error> {
        Ok(self
            .lock()
            .clients
            .values()
            .find(|c| c.api_key == api_key)
            .cloned())
    }

    async fn find_plan_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Option<SubscriptionPlan>, Error> {
        let inner = self.lock();
        Ok(inner
            .clients
            .get(&client_id)
            .and_then(|c| inner.plans.get(&c.subscription_plan_id))
            .cloned())
    }

    async fn active_global_rules(&self) -> Result<Vec<RateLimitRule>, Error> {
        let mut rules: Vec<RateLimitRule> = self
            .lock()
            .rules
            .values()
            .filter(|r| r.active && r.limit_type == LimitKind::Global)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn create_plan(&self, plan: SubscriptionPlan) -> Result<SubscriptionPlan, Error> {
        self.lock().plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn update_plan(&self, plan: SubscriptionPlan) -> Result<SubscriptionPlan, Error> {
        let mut inner = self.lock();
        if !inner.plans.contains_key(&plan.id) {
            return Err(Error::new(ErrorDetails::NotFound {
                message: format!("Plan not found: {}", plan.id),
            }));
        }
        inner.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>, Error> {
        let mut plans: Vec<SubscriptionPlan> = self.lock().plans.values().cloned().collect();
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    async fn find_plan(&self, id: Uuid) -> Result<Option<SubscriptionPlan>, Error> {
        Ok(self.lock().plans.get(&id).cloned())
    }

    async fn find_plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>, Error> {
        Ok(self
            .lock()
            .plans
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn create_client(&self, client: Client) -> Result<Client, Error> {
        self.lock().clients.insert(client.id, client.clone());
        Ok(client)
    }

    async fn list_clients(&self) -> Result<Vec<Client>, Error> {
        let mut clients: Vec<Client> = self.lock().clients.values().cloned().collect();
        clients.sort_by_key(|c| c.created_at);
        Ok(clients)
    }

    async fn find_client(&self, id: Uuid) -> Result<Option<Client>, Error> {
        Ok(self.lock().clients.get(&id).cloned())
    }

    async fn clients_for_plan(&self, plan_id: Uuid) -> Result<Vec<Client>, Error> {
        Ok(self
            .lock()
            .clients
            .values()
            .filter(|c| c.subscription_plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn create_rule(&self, rule: RateLimitRule) -> Result<RateLimitRule, Error> {
        self.lock().rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, rule: RateLimitRule) -> Result<RateLimitRule, Error> {
        let mut inner = self.lock();
        if !inner.rules.contains_key(&rule.id) {
            return Err(Error::new(ErrorDetails::NotFound {
                message: format!("Rule not found: {}", rule.id),
            }));
        }
        inner.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn list_rules(&self) -> Result<Vec<RateLimitRule>, Error> {
        let mut rules: Vec<RateLimitRule> = self.lock().rules.values().cloned().collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn find_rule(&self, id: Uuid) -> Result<Option<RateLimitRule>, Error> {
        Ok(self.lock().rules.get(&id).cloned())
    }
}
