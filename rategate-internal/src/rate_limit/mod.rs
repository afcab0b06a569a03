//! The admission decision pipeline: time-bucket keying, subscription
//! resolution, effective-limit assembly, the atomic multi-limit evaluation,
//! throttle classification, and the HTTP admission filter.

pub mod bucket;
pub mod classifier;
pub mod limiter;
pub mod limits;
pub mod middleware;
pub mod subscription;

pub use limiter::{DistributedRateLimiter, RateLimitResult};
pub use limits::EffectiveLimit;
pub use middleware::admission_filter;
