//! Admin CRUD surface for plans, clients, and global rules.
//!
//! Writes go straight to the durable store. Editing a plan invalidates the
//! subscription cache entry and every counter key of each affected client,
//! so the next admission observes the new limits from a clean slate. Rule
//! changes need no invalidation: rules are read per request.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::counter_store::CounterStore as _;
use crate::domain::{Client, LimitKind, RateLimitRule, SubscriptionPlan};
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::AppStateData;
use crate::rate_limit::bucket;
use crate::subscription_store::SubscriptionStore as _;
use crate::util::generate_api_key;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub name: Option<String>,
    pub monthly_limit: Option<i64>,
    pub window_limit: Option<i64>,
    pub window_seconds: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub monthly_limit: Option<i64>,
    pub window_limit: Option<i64>,
    pub window_seconds: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    pub name: Option<String>,
    pub subscription_plan_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    pub limit_type: Option<LimitKind>,
    pub limit_value: Option<i64>,
    pub global_window_seconds: Option<i32>,
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorDetails::InvalidRequest {
        message: message.into(),
    })
}

fn validate_plan_fields(
    name: &Option<String>,
    monthly_limit: Option<i64>,
    window_limit: Option<i64>,
    window_seconds: Option<i32>,
) -> Result<(String, i64), Error> {
    let name = name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid("name must not be blank"))?;
    let monthly_limit = monthly_limit.ok_or_else(|| invalid("monthlyLimit is required"))?;
    if monthly_limit < 1 {
        return Err(invalid("monthlyLimit must be >= 1"));
    }
    match (window_limit, window_seconds) {
        (None, None) => {}
        (Some(limit), Some(seconds)) => {
            if limit < 1 || seconds < 1 {
                return Err(invalid("windowLimit and windowSeconds must be >= 1"));
            }
        }
        _ => {
            return Err(invalid(
                "windowLimit and windowSeconds must be set together",
            ));
        }
    }
    Ok((name.to_string(), monthly_limit))
}

pub async fn create_plan(
    State(state): State<AppStateData>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<SubscriptionPlan>), Error> {
    let (name, monthly_limit) = validate_plan_fields(
        &request.name,
        request.monthly_limit,
        request.window_limit,
        request.window_seconds,
    )?;

    if state.subscription_store.find_plan_by_name(&name).await?.is_some() {
        return Err(invalid(format!("Plan with name '{name}' already exists")));
    }

    let plan = SubscriptionPlan {
        id: Uuid::new_v4(),
        name,
        monthly_limit,
        window_limit: request.window_limit,
        window_seconds: request.window_seconds,
        active: true,
        expires_at: request.expires_at,
        created_at: Utc::now(),
    };
    let plan = state.subscription_store.create_plan(plan).await?;
    info!(plan = %plan.name, monthly_limit = plan.monthly_limit, "Created subscription plan");
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn update_plan(
    State(state): State<AppStateData>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePlanRequest>,
) -> Result<Json<SubscriptionPlan>, Error> {
    let existing = state.subscription_store.find_plan(id).await?.ok_or_else(|| {
        Error::new(ErrorDetails::NotFound {
            message: format!("Plan not found: {id}"),
        })
    })?;

    let name = request.name.clone().or(Some(existing.name.clone()));
    let monthly_limit = request.monthly_limit.or(Some(existing.monthly_limit));
    let window_limit = request.window_limit.or(existing.window_limit);
    let window_seconds = request.window_seconds.or(existing.window_seconds);
    let (name, monthly_limit) =
        validate_plan_fields(&name, monthly_limit, window_limit, window_seconds)?;

    if !name.eq_ignore_ascii_case(&existing.name) {
        if let Some(other) = state.subscription_store.find_plan_by_name(&name).await? {
            if other.id != id {
                return Err(invalid(format!("Plan with name '{name}' already exists")));
            }
        }
    }

    let updated = SubscriptionPlan {
        id,
        name,
        monthly_limit,
        window_limit,
        window_seconds,
        active: request.active.unwrap_or(existing.active),
        expires_at: request.expires_at.or(existing.expires_at),
        created_at: existing.created_at,
    };
    let updated = state.subscription_store.update_plan(updated).await?;

    // Limits changed: reset cached subscriptions and usage for every client
    // on this plan so the next admission sees durable-store state.
    let affected = state.subscription_store.clients_for_plan(id).await?;
    for client in &affected {
        invalidate_client(&state, client.id).await?;
    }
    info!(
        plan = %updated.name,
        affected_clients = affected.len(),
        "Updated subscription plan and invalidated client counters"
    );

    Ok(Json(updated))
}

async fn invalidate_client(state: &AppStateData, client_id: Uuid) -> Result<(), Error> {
    state
        .counter_store
        .delete(&bucket::subscription_cache_key(client_id))
        .await?;
    state
        .counter_store
        .delete_matching(&bucket::client_counter_pattern(client_id))
        .await?;
    Ok(())
}

pub async fn list_plans(
    State(state): State<AppStateData>,
) -> Result<Json<Vec<SubscriptionPlan>>, Error> {
    Ok(Json(state.subscription_store.list_plans().await?))
}

pub async fn get_plan(
    State(state): State<AppStateData>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionPlan>, Error> {
    state
        .subscription_store
        .find_plan(id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            Error::new(ErrorDetails::NotFound {
                message: format!("Plan not found: {id}"),
            })
        })
}

pub async fn create_client(
    State(state): State<AppStateData>,
    Json(request): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<Client>), Error> {
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid("name must not be blank"))?;
    let plan_id = request
        .subscription_plan_id
        .ok_or_else(|| invalid("subscriptionPlanId is required"))?;

    if state.subscription_store.find_plan(plan_id).await?.is_none() {
        return Err(invalid(format!("Subscription plan not found: {plan_id}")));
    }

    let client = Client {
        id: Uuid::new_v4(),
        name: name.to_string(),
        api_key: generate_api_key(),
        subscription_plan_id: plan_id,
        active: true,
        created_at: Utc::now(),
    };
    let client = state.subscription_store.create_client(client).await?;
    info!(client = %client.name, "Created client");
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn list_clients(State(state): State<AppStateData>) -> Result<Json<Vec<Client>>, Error> {
    Ok(Json(state.subscription_store.list_clients().await?))
}

pub async fn get_client(
    State(state): State<AppStateData>,
    Path(id): Path<Uuid>,
) -> Result<Json<Client>, Error> {
    state
        .subscription_store
        .find_client(id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            Error::new(ErrorDetails::NotFound {
                message: format!("Client not found: {id}"),
            })
        })
}

fn validate_rule_fields(request: &CreateRuleRequest) -> Result<i64, Error> {
    if request.limit_type != Some(LimitKind::Global) {
        return Err(invalid(
            "Only GLOBAL rate limit rules are supported. \
             Per-client limits should use subscription plans.",
        ));
    }
    let limit_value = request
        .limit_value
        .ok_or_else(|| invalid("limitValue is required"))?;
    if limit_value < 1 {
        return Err(invalid("limitValue must be >= 1"));
    }
    if let Some(seconds) = request.global_window_seconds {
        if seconds <= 0 {
            return Err(invalid(
                "globalWindowSeconds must be > 0 if specified. \
                 Example: globalWindowSeconds=60 (limit per minute)",
            ));
        }
    }
    Ok(limit_value)
}

pub async fn create_rule(
    State(state): State<AppStateData>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<RateLimitRule>), Error> {
    let limit_value = validate_rule_fields(&request)?;
    let rule = RateLimitRule {
        id: Uuid::new_v4(),
        limit_type: LimitKind::Global,
        limit_value,
        global_window_seconds: request.global_window_seconds,
        active: true,
        created_at: Utc::now(),
    };
    let rule = state.subscription_store.create_rule(rule).await?;
    info!(limit_value = rule.limit_value, "Created global rate limit rule");
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_rule(
    State(state): State<AppStateData>,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<Json<RateLimitRule>, Error> {
    let existing = state.subscription_store.find_rule(id).await?.ok_or_else(|| {
        Error::new(ErrorDetails::NotFound {
            message: format!("Rule not found: {id}"),
        })
    })?;
    let limit_value = validate_rule_fields(&request)?;
    let updated = RateLimitRule {
        limit_value,
        global_window_seconds: request.global_window_seconds,
        ..existing
    };
    let updated = state.subscription_store.update_rule(updated).await?;
    Ok(Json(updated))
}

pub async fn list_rules(
    State(state): State<AppStateData>,
) -> Result<Json<Vec<RateLimitRule>>, Error> {
    Ok(Json(state.subscription_store.list_rules().await?))
}

pub async fn get_rule(
    State(state): State<AppStateData>,
    Path(id): Path<Uuid>,
) -> Result<Json<RateLimitRule>, Error> {
    state
        .subscription_store
        .find_rule(id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            Error::new(ErrorDetails::NotFound {
                message: format!("Rule not found: {id}"),
            })
        })
}
