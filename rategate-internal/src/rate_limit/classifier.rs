//! Throttle classification for denied requests, and the global-usage
//! observability events.
//!
//! Client limits (WINDOW/MONTHLY) always reject hard. Global limits reject
//! soft in the band between the soft and hard thresholds, giving well-behaved
//! callers a damped retry signal while the system is merely saturated, and
//! hard once usage runs away past the hard threshold.

use crate::config::{RateLimiterConfig, ThrottlingMode};
use crate::domain::{LimitKind, ThrottleType};

/// Decide how a denial is served: the throttle label and the delay in
/// milliseconds to sleep before responding. The delay is only ever non-zero
/// for SOFT denials with the `soft` throttling mode configured.
pub fn classify(
    config: &RateLimiterConfig,
    failed_kind: LimitKind,
    global_usage_ratio: Option<f64>,
) -> (ThrottleType, u64) {
    match failed_kind {
        LimitKind::Window | LimitKind::Monthly => (ThrottleType::Hard, 0),
        LimitKind::Global => {
            let Some(ratio) = global_usage_ratio else {
                return (ThrottleType::Hard, 0);
            };
            if ratio >= config.global_hard_threshold {
                (ThrottleType::Hard, 0)
            } else if ratio >= config.global_soft_threshold {
                let delay = if config.throttling == ThrottlingMode::Soft {
                    config.soft_delay_ms
                } else {
                    0
                };
                (ThrottleType::Soft, delay)
            } else {
                // A denial means count >= ceiling, so the ratio is at least
                // 1.0 and the soft threshold at most 1.0 catches it above.
                (ThrottleType::Hard, 0)
            }
        }
    }
}

/// Emit the global-usage events for an admitted request. Observability only;
/// the admission outcome is already decided.
pub fn log_global_usage(config: &RateLimiterConfig, global_usage_ratio: Option<f64>) {
    let Some(ratio) = global_usage_ratio else {
        return;
    };
    if ratio >= config.global_full_threshold {
        tracing::warn!(
            usage_percent = format!("{:.0}", ratio * 100.0),
            "Global rate limit at or over capacity"
        );
    } else if ratio >= config.global_warn_threshold {
        tracing::warn!(
            usage_percent = format!("{:.0}", ratio * 100.0),
            "Global rate limit usage approaching capacity"
        );
    }
}
