use uuid::Uuid;

const API_KEY_PREFIX: &str = "rk_";

/// Generate a client API key: `rk_` followed by a 32-character hex body.
/// Keys are generated once at client creation and never regenerated.
pub fn generate_api_key() -> String {
    format!("{API_KEY_PREFIX}{}", Uuid::new_v4().simple())
}

/// Format seconds as a human-readable duration for retry messages, e.g.
/// "45 seconds", "2 hours 30 minutes", "2 weeks 3 days".
pub fn format_duration(seconds: i64) -> String {
    fn unit(value: i64, name: &str) -> String {
        if value == 1 {
            format!("1 {name}")
        } else {
            format!("{value} {name}s")
        }
    }

    if seconds < 0 {
        return "invalid".to_string();
    }
    if seconds < 60 {
        return unit(seconds, "second");
    }

    let minutes = seconds / 60;
    let seconds = seconds % 60;
    if minutes < 60 {
        return if seconds > 0 {
            format!("{} {}", unit(minutes, "minute"), unit(seconds, "second"))
        } else {
            unit(minutes, "minute")
        };
    }

    let hours = minutes / 60;
    let minutes = minutes % 60;
    if hours < 24 {
        return if minutes > 0 {
            format!("{} {}", unit(hours, "hour"), unit(minutes, "minute"))
        } else {
            unit(hours, "hour")
        };
    }

    let days = hours / 24;
    let hours = hours % 24;
    if days < 7 {
        return if hours > 0 {
            format!("{} {}", unit(days, "day"), unit(hours, "hour"))
        } else {
            unit(days, "day")
        };
    }

    let weeks = days / 7;
    let days = days % 7;
    if days > 0 {
        format!("{} {}", unit(weeks, "week"), unit(days, "day"))
    } else {
        unit(weeks, "week")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_api_key_shape() {
        let key = generate_api_key();
        assert!(key.starts_with("rk_"));
        assert_eq!(key.len(), 35);
        assert!(key[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_api_key(), key);
    }

    #[test]
    fn test_format_duration_seconds_and_minutes() {
        assert_eq!(format_duration(0), "0 seconds");
        assert_eq!(format_duration(1), "1 second");
        assert_eq!(format_duration(45), "45 seconds");
        assert_eq!(format_duration(60), "1 minute");
        assert_eq!(format_duration(61), "1 minute 1 second");
        assert_eq!(format_duration(150), "2 minutes 30 seconds");
    }

    #[test]
    fn test_format_duration_larger_units() {
        assert_eq!(format_duration(3600), "1 hour");
        assert_eq!(format_duration(9000), "2 hours 30 minutes");
        assert_eq!(format_duration(86400), "1 day");
        assert_eq!(format_duration(273_600), "3 days 4 hours");
        assert_eq!(format_duration(1_468_800), "2 weeks 3 days");
        assert_eq!(format_duration(-1), "invalid");
    }
}
