//! Time units used on the air.
//!
//! 802.11 expresses most intervals in time units (1 TU = 1024 µs). Protocol
//! engines keep [`Duration`] internally and convert at the element boundary.

use std::time::Duration;

/// One time unit
pub const TU: Duration = Duration::from_micros(1024);

/// Convert a count of time units to a duration
pub fn tu(count: u32) -> Duration {
    Duration::from_micros(u64::from(count) * 1024)
}

/// Convert a duration to whole time units, saturating at `u32::MAX`
pub fn to_tu(duration: Duration) -> u32 {
    let tus = duration.as_micros() / 1024;
    u32::try_from(tus).unwrap_or(u32::MAX)
}

/// Serde helpers for human readable durations (`"5s"`, `"102ms 400us"`)
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a duration as a humantime string
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    /// Deserialize a duration from a humantime string
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Timed {
        #[serde(with = "humantime_serde")]
        interval: Duration,
    }

    #[test]
    fn test_tu_conversion() {
        assert_eq!(tu(100), Duration::from_micros(102_400));
        assert_eq!(to_tu(Duration::from_micros(102_400)), 100);
        assert_eq!(to_tu(Duration::from_micros(1023)), 0);
        assert_eq!(to_tu(Duration::from_secs(u64::MAX / 2)), u32::MAX);
    }

    #[test]
    fn test_humantime_serde() {
        let parsed: Timed = serde_json::from_str(r#"{"interval":"102ms 400us"}"#).unwrap();
        assert_eq!(parsed.interval, tu(100));
        let text = serde_json::to_string(&parsed).unwrap();
        assert_eq!(text, r#"{"interval":"102ms 400us"}"#);
    }
}
