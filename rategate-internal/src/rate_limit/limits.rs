//! Effective-limit assembly: materializes the ordered list of ceilings to
//! enforce for one request, from the client's plan and the active global
//! rules.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{LimitKind, RateLimitRule, SubscriptionPlan};
use crate::rate_limit::bucket;

/// A single ceiling to enforce, derived from the subscription plan or a
/// global rule. Each variant carries only the fields it needs; the key and
/// TTL builders dispatch on the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveLimit {
    Window {
        limit: u64,
        window_seconds: u32,
        client_id: Uuid,
    },
    Monthly {
        limit: u64,
        client_id: Uuid,
    },
    Global {
        limit: u64,
        window_seconds: Option<u32>,
    },
}

impl EffectiveLimit {
    pub fn kind(&self) -> LimitKind {
        match self {
            EffectiveLimit::Window { .. } => LimitKind::Window,
            EffectiveLimit::Monthly { .. } => LimitKind::Monthly,
            EffectiveLimit::Global { .. } => LimitKind::Global,
        }
    }

    pub fn ceiling(&self) -> u64 {
        match self {
            EffectiveLimit::Window { limit, .. }
            | EffectiveLimit::Monthly { limit, .. }
            | EffectiveLimit::Global { limit, .. } => *limit,
        }
    }

    /// True when the limit applies to one client rather than the whole system.
    pub fn is_client_limit(&self) -> bool {
        matches!(
            self,
            EffectiveLimit::Window { .. } | EffectiveLimit::Monthly { .. }
        )
    }

    /// Counter key for the bucket containing `now`.
    pub fn counter_key(&self, now: DateTime<Utc>) -> String {
        match self {
            EffectiveLimit::Window {
                window_seconds,
                client_id,
                ..
            } => bucket::client_window_key(*client_id, *window_seconds, now),
            EffectiveLimit::Monthly { client_id, .. } => {
                bucket::client_monthly_key(*client_id, now)
            }
            EffectiveLimit::Global {
                window_seconds: Some(seconds),
                ..
            } => bucket::global_window_key(*seconds, now),
            EffectiveLimit::Global {
                window_seconds: None,
                ..
            } => bucket::global_monthly_key(now),
        }
    }

    /// TTL to set when the counter is created in the bucket containing `now`.
    pub fn ttl_seconds(&self, now: DateTime<Utc>) -> i64 {
        match self {
            EffectiveLimit::Window { window_seconds, .. } => i64::from(*window_seconds),
            EffectiveLimit::Monthly { .. } => bucket::monthly_ttl_seconds(now),
            EffectiveLimit::Global {
                window_seconds: Some(seconds),
                ..
            } => i64::from(*seconds),
            EffectiveLimit::Global {
                window_seconds: None,
                ..
            } => bucket::monthly_ttl_seconds(now),
        }
    }
}

/// Build the ordered limit list for a client with an effectively-active plan.
///
/// Ordering is a contract: GLOBAL before MONTHLY before WINDOW, so a global
/// overflow reports as GLOBAL even when a client limit would also have
/// overflowed. Ceilings of zero are disabled and never materialized.
pub fn resolve(
    client_id: Uuid,
    plan: &SubscriptionPlan,
    rules: &[RateLimitRule],
) -> Vec<EffectiveLimit> {
    let mut limits = Vec::new();

    for rule in rules {
        if !rule.active || rule.limit_type != LimitKind::Global || rule.limit_value <= 0 {
            continue;
        }
        limits.push(EffectiveLimit::Global {
            limit: rule.limit_value as u64,
            window_seconds: rule
                .global_window_seconds
                .filter(|s| *s > 0)
                .map(|s| s as u32),
        });
    }

    if plan.monthly_limit > 0 {
        limits.push(EffectiveLimit::Monthly {
            limit: plan.monthly_limit as u64,
            client_id,
        });
    }

    if let (Some(window_limit), Some(window_seconds)) = (plan.window_limit, plan.window_seconds) {
        if window_limit > 0 && window_seconds > 0 {
            limits.push(EffectiveLimit::Window {
                limit: window_limit as u64,
                window_seconds: window_seconds as u32,
                client_id,
            });
        }
    }

    limits.sort_by_key(EffectiveLimit::kind);
    limits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn plan(monthly: i64, window: Option<(i64, i32)>) -> SubscriptionPlan {
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            monthly_limit: monthly,
            window_limit: window.map(|(l, _)| l),
            window_seconds: window.map(|(_, s)| s),
            active: true,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    fn global_rule(limit: i64, window_seconds: Option<i32>, active: bool) -> RateLimitRule {
        RateLimitRule {
            id: Uuid::new_v4(),
            limit_type: LimitKind::Global,
            limit_value: limit,
            global_window_seconds: window_seconds,
            active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_plan_only() {
        let client_id = Uuid::new_v4();
        let limits = resolve(client_id, &plan(100, None), &[]);
        assert_eq!(
            limits,
            vec![EffectiveLimit::Monthly {
                limit: 100,
                client_id
            }]
        );
    }

    #[test]
    fn test_resolve_orders_global_first() {
        let client_id = Uuid::new_v4();
        let limits = resolve(
            client_id,
            &plan(10_000, Some((5, 60))),
            &[global_rule(1000, Some(60), true)],
        );
        assert_eq!(limits.len(), 3);
        assert_eq!(limits[0].kind(), LimitKind::Global);
        assert_eq!(limits[1].kind(), LimitKind::Monthly);
        assert_eq!(limits[2].kind(), LimitKind::Window);
    }

    #[test]
    fn test_resolve_skips_inactive_rules_and_zero_ceilings() {
        let client_id = Uuid::new_v4();
        let limits = resolve(
            client_id,
            &plan(0, None),
            &[global_rule(1000, None, false), global_rule(0, None, true)],
        );
        assert!(limits.is_empty());
    }

    #[test]
    fn test_window_requires_both_fields_positive() {
        let client_id = Uuid::new_v4();
        let mut p = plan(100, Some((5, 60)));
        p.window_seconds = Some(0);
        let limits = resolve(client_id, &p, &[]);
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].kind(), LimitKind::Monthly);
    }

    #[test]
    fn test_global_rule_without_window_is_monthly_global() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        let limit = EffectiveLimit::Global {
            limit: 50,
            window_seconds: None,
        };
        assert_eq!(limit.counter_key(now), "rl:g:m:202608");
        assert_eq!(limit.ttl_seconds(now), bucket::monthly_ttl_seconds(now));
    }

    #[test]
    fn test_ttl_dispatch() {
        let now = Utc::now();
        let client_id = Uuid::new_v4();
        let window = EffectiveLimit::Window {
            limit: 5,
            window_seconds: 60,
            client_id,
        };
        assert_eq!(window.ttl_seconds(now), 60);
        let monthly = EffectiveLimit::Monthly {
            limit: 100,
            client_id,
        };
        assert!(monthly.ttl_seconds(now) > 0);
    }
}
