use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use uuid::Uuid;

/// Subscription plan defining monthly (and optional per-window) limits for
/// clients. Rate limiting is applied based on the plan a client subscribes to.
///
/// Invariant: `window_limit` is set iff `window_seconds` is set, both positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    /// Maximum requests per calendar month for this plan.
    pub monthly_limit: i64,
    /// Optional: max requests per time window. None = no window cap.
    pub window_limit: Option<i64>,
    /// When `window_limit` is set: window duration in seconds.
    pub window_seconds: Option<i32>,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    /// A plan is effectively active when the admin has not disabled it AND it
    /// has not date-expired. Both conditions must hold.
    pub fn is_effectively_active(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.expires_at {
            None => true,
            Some(expires_at) => now < expires_at,
        }
    }
}

/// An API client identified by an opaque key. Every client references exactly
/// one subscription plan; the key is globally unique and never regenerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    /// API key presented in the X-API-Key header (`rk_` + 32 hex chars).
    pub api_key: String,
    pub subscription_plan_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// System-wide rate limit rule. Only GLOBAL rules are modelled; per-client
/// limits come from subscription plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    pub id: Uuid,
    pub limit_type: LimitKind,
    pub limit_value: i64,
    /// Window duration in seconds. None means the rule caps a calendar month.
    pub global_window_seconds: Option<i32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Which ceiling a limit enforces. The variant order is the enforcement
/// priority: global limits are checked before client limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "limit_kind", rename_all = "UPPERCASE")]
pub enum LimitKind {
    Global,
    Monthly,
    Window,
}

impl Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::Global => write!(f, "GLOBAL"),
            LimitKind::Monthly => write!(f, "MONTHLY"),
            LimitKind::Window => write!(f, "WINDOW"),
        }
    }
}

/// How a denial is served back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrottleType {
    /// Request allowed, no throttling.
    None,
    /// Rejected after a bounded cooperative delay to damp burst retries.
    Soft,
    /// Rejected immediately.
    Hard,
}

impl Display for ThrottleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleType::None => write!(f, "NONE"),
            ThrottleType::Soft => write!(f, "SOFT"),
            ThrottleType::Hard => write!(f, "HARD"),
        }
    }
}
