//! Parsing for human-readable durations like "15m", "24h" in config files.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Parse a duration string like "14d", "24h", "30m", "60s".
/// Case-insensitive; surrounding whitespace is trimmed.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let (num, multiplier) = if let Some(num) = s.strip_suffix('d') {
        (num, 24 * 60 * 60)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 60 * 60)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1)
    } else {
        anyhow::bail!("Duration must end with d, h, m, or s");
    };

    let num: u64 = num.parse().with_context(|| "Invalid number in duration")?;
    let secs = num.checked_mul(multiplier).context("Duration is too large")?;
    Ok(Duration::from_secs(secs))
}

/// Format a duration using the largest unit that divides it evenly.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    for (unit, size) in [("d", 24 * 60 * 60), ("h", 60 * 60), ("m", 60)] {
        if secs >= size && secs % size == 0 {
            return format!("{}{unit}", secs / size);
        }
    }
    format!("{secs}s")
}

/// Serde deserializer for duration strings.
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_duration("14d").unwrap(), Duration::from_secs(14 * 86400));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(24 * 3600));
        assert_eq!(parse_duration("15M").unwrap(), Duration::from_secs(15 * 60));
        assert_eq!(parse_duration(" 45s ").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("1w").is_err());
        assert!(parse_duration("-1d").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration(&format!("{}d", u64::MAX)).is_err());
    }

    #[test]
    fn format_uses_largest_even_unit() {
        assert_eq!(format_duration(Duration::from_secs(86400)), "1d");
        assert_eq!(format_duration(Duration::from_secs(900)), "15m");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
    }

    #[test]
    fn deserializes_from_toml() {
        #[derive(Deserialize)]
        struct TestConfig {
            #[serde(deserialize_with = "deserialize_duration")]
            interval: Duration,
        }

        let config: TestConfig = toml::from_str(r#"interval = "15m""#).unwrap();
        assert_eq!(config.interval, Duration::from_secs(900));
    }
}
