//! Small helpers shared by the mqrpc crates
//!
//! ## Core Features:
//! - **Timestamp Utilities**: millisecond timestamps used for the `local_timestamp` header
//! - **Duration Conversion**: `1m30s` / `250ms` style strings to [`Duration`]
//! - **Serde Helpers**: deserializers for human-readable durations in configuration files
//!
//! ## Usage Examples:
//! ```rust
//! use mqrpc_utils::{to_duration, timestamp_millis, format_timestamp_millis};
//!
//! let duration = to_duration("1m30s");
//! assert_eq!(duration.as_secs(), 90);
//!
//! let now = timestamp_millis();
//! assert!(now > 0);
//! assert!(!format_timestamp_millis(now).is_empty());
//! ```

#![deny(unsafe_code)]

use std::time::Duration;

use serde::{de::Deserializer, Deserialize};

/// Timestamp representation in milliseconds since Unix epoch
pub type TimestampMillis = i64;

/// Deserialize Duration from human-readable string format
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

/// Convert human-readable duration string to Duration
///
/// # Supported units:
/// - ms: milliseconds
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
/// - w: weeks
///
/// Unknown units and malformed numbers count as zero.
///
/// # Example:
/// ```
/// let duration = mqrpc_utils::to_duration("1h30m15s");
/// assert_eq!(duration.as_secs(), 5415);
///
/// let short = mqrpc_utils::to_duration("2s500ms");
/// assert_eq!(short.as_millis(), 2500);
/// ```
#[inline]
pub fn to_duration(text: &str) -> Duration {
    let text = text.to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'w', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().trim().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60000,
                'h' => v * 3600000,
                'd' => v * 86400000,
                'w' => v * 604800000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

/// Get current timestamp in milliseconds
///
/// # Example:
/// ```
/// let ts = mqrpc_utils::timestamp_millis();
/// assert!(ts > 0);
/// ```
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

/// Format millisecond timestamp to string
#[inline]
pub fn format_timestamp_millis(t: TimestampMillis) -> String {
    if t <= 0 {
        "".into()
    } else {
        use chrono::TimeZone;
        if let chrono::LocalResult::Single(t) = chrono::Local.timestamp_millis_opt(t) {
            t.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        } else {
            "".into()
        }
    }
}

/// Format current millisecond timestamp to string
#[inline]
pub fn format_timestamp_millis_now() -> String {
    format_timestamp_millis(timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_duration() {
        assert_eq!(to_duration("5s"), Duration::from_secs(5));
        assert_eq!(to_duration("50ms"), Duration::from_millis(50));
        assert_eq!(to_duration("1m1s"), Duration::from_secs(61));
        assert_eq!(to_duration("2w"), Duration::from_secs(1_209_600));
        assert_eq!(to_duration("1d"), Duration::from_secs(86_400));
    }

    #[test]
    fn test_to_duration_malformed() {
        assert_eq!(to_duration(""), Duration::ZERO);
        assert_eq!(to_duration("abc"), Duration::ZERO);
        assert_eq!(to_duration("xs10s"), Duration::from_secs(10));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp_millis(0), "");
        assert_eq!(format_timestamp_millis(-1), "");
        assert!(!format_timestamp_millis_now().is_empty());
    }

    #[test]
    fn test_deserialize_duration() {
        #[derive(Deserialize)]
        struct Cfg {
            #[serde(deserialize_with = "deserialize_duration")]
            timeout: Duration,
        }
        let cfg: Cfg = serde_json::from_str(r#"{"timeout": "1500ms"}"#).unwrap();
        assert_eq!(cfg.timeout, Duration::from_millis(1500));
        assert!(serde_json::from_str::<Cfg>(r#"{"timeout": 15}"#).is_err());
    }
}
