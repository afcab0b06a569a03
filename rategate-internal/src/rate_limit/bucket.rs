//! Time-bucket keying for counters.
//!
//! Two disciplines: fixed windows of W seconds aligned to `floor(now / W) * W`
//! (a burst straddling a boundary may briefly see up to twice the limit across
//! two windows; the scheme is O(1), atomic, and consistent across nodes), and
//! calendar months identified by `YYYYMM` in UTC. Bucket math uses wall-clock
//! UTC seconds so buckets align across nodes; monotonic clocks must not be
//! substituted here.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use uuid::Uuid;

const KEY_PREFIX: &str = "rl:";
const SUBSCRIPTION_CACHE_PREFIX: &str = "sub:cache:";

/// Start of the fixed window containing `now`, in unix seconds.
pub fn window_bucket(now: DateTime<Utc>, window_seconds: u32) -> i64 {
    let sec = i64::from(window_seconds.max(1));
    now.timestamp() / sec * sec
}

/// Calendar-month bucket identifier, e.g. `202608`.
pub fn month_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y%m").to_string()
}

/// Seconds from `now` until the first instant of the next UTC month.
pub fn monthly_ttl_seconds(now: DateTime<Utc>) -> i64 {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    // The first of the next month always exists.
    let next_month = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|| now + chrono::Duration::days(31));
    (next_month - now).num_seconds().max(1)
}

pub fn client_window_key(client_id: Uuid, window_seconds: u32, now: DateTime<Utc>) -> String {
    format!(
        "{KEY_PREFIX}c:{client_id}:w:{}",
        window_bucket(now, window_seconds)
    )
}

pub fn client_monthly_key(client_id: Uuid, now: DateTime<Utc>) -> String {
    format!("{KEY_PREFIX}c:{client_id}:m:{}", month_bucket(now))
}

pub fn global_window_key(window_seconds: u32, now: DateTime<Utc>) -> String {
    format!("{KEY_PREFIX}g:w:{}", window_bucket(now, window_seconds))
}

pub fn global_monthly_key(now: DateTime<Utc>) -> String {
    format!("{KEY_PREFIX}g:m:{}", month_bucket(now))
}

pub fn subscription_cache_key(client_id: Uuid) -> String {
    format!("{SUBSCRIPTION_CACHE_PREFIX}{client_id}")
}

/// Pattern matching every counter key belonging to one client, used by the
/// admin surface when a plan change must reset usage.
pub fn client_counter_pattern(client_id: Uuid) -> String {
    format!("{KEY_PREFIX}c:{client_id}:*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_window_bucket_alignment() {
        // 1000 / 60 * 60 = 960
        assert_eq!(window_bucket(at(1000), 60), 960);
        assert_eq!(window_bucket(at(960), 60), 960);
        assert_eq!(window_bucket(at(1019), 60), 960);
        assert_eq!(window_bucket(at(1020), 60), 1020);
    }

    #[test]
    fn test_month_bucket_format() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        assert_eq!(month_bucket(now), "202608");
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap();
        assert_eq!(month_bucket(now), "202601");
    }

    #[test]
    fn test_monthly_ttl_reaches_next_month_start() {
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        let ttl = monthly_ttl_seconds(now);
        assert_eq!(now + chrono::Duration::seconds(ttl), Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_monthly_ttl_december_rollover() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 23, 0, 0).unwrap();
        let ttl = monthly_ttl_seconds(now);
        assert_eq!(ttl, 3600);
        assert_eq!(now + chrono::Duration::seconds(ttl), Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        let now = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 30).unwrap();
        assert_eq!(
            client_window_key(id, 60, now),
            format!("rl:c:{id}:w:{}", now.timestamp() / 60 * 60)
        );
        assert_eq!(client_monthly_key(id, now), format!("rl:c:{id}:m:202608"));
        assert_eq!(global_monthly_key(now), "rl:g:m:202608");
        assert!(global_window_key(60, now).starts_with("rl:g:w:"));
        assert_eq!(subscription_cache_key(id), format!("sub:cache:{id}"));
        assert_eq!(client_counter_pattern(id), format!("rl:c:{id}:*"));
    }
}
