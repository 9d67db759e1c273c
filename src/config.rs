use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;
use crate::error::TrackerError;
use crate::ingest::BrokerFormat;
use crate::models::BrokerType;
use crate::refresh::RefreshSchedule;

/// Minimum quote-poll interval. Public quote endpoints throttle hard below
/// this, so configured intervals are floored here.
const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(15 * 60);

fn default_base_currency() -> String {
    "EUR".to_string()
}

fn default_update_interval() -> Duration {
    MIN_UPDATE_INTERVAL
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_broker_type() -> BrokerType {
    BrokerType::Csv
}

/// One configured broker entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    pub broker_name: String,

    #[serde(default = "default_broker_type")]
    pub broker_type: BrokerType,

    /// Directory watched for CSV drops. Required for `csv` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_dir: Option<PathBuf>,

    /// CSV dialect pre-processing tag; `auto` sniffs per file.
    #[serde(default)]
    pub format: BrokerFormat,

    #[serde(default = "default_base_currency")]
    pub base_currency: String,

    /// Nominal quote-refresh interval, floored at 15 minutes.
    #[serde(
        default = "default_update_interval",
        deserialize_with = "deserialize_duration",
        skip_serializing
    )]
    pub update_interval: Duration,

    /// Upper bound on any single quote fetch.
    #[serde(
        default = "default_fetch_timeout",
        deserialize_with = "deserialize_duration",
        skip_serializing
    )]
    pub fetch_timeout: Duration,

    /// Per-entry symbol overrides: raw broker symbol -> canonical symbol.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub symbol_overrides: HashMap<String, String>,
}

impl EntryConfig {
    pub fn new(broker_name: impl Into<String>, broker_type: BrokerType) -> Self {
        Self {
            broker_name: broker_name.into(),
            broker_type,
            import_dir: None,
            format: BrokerFormat::Auto,
            base_currency: default_base_currency(),
            update_interval: default_update_interval(),
            fetch_timeout: default_fetch_timeout(),
            symbol_overrides: HashMap::new(),
        }
    }

    pub fn with_import_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.import_dir = Some(dir.into());
        self
    }

    pub fn with_base_currency(mut self, currency: impl Into<String>) -> Self {
        self.base_currency = currency.into();
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_symbol_override(
        mut self,
        raw: impl Into<String>,
        canonical: impl Into<String>,
    ) -> Self {
        self.symbol_overrides.insert(raw.into(), canonical.into());
        self
    }

    /// Setup-time validation: these problems are fatal for the entry, unlike
    /// anything row- or symbol-scoped.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.broker_name.trim().is_empty() {
            return Err(TrackerError::FatalConfiguration(
                "entry has no broker_name".to_string(),
            ));
        }
        if self.broker_type == BrokerType::Csv && self.import_dir.is_none() {
            return Err(TrackerError::FatalConfiguration(format!(
                "csv entry '{}' has no import_dir",
                self.broker_name
            )));
        }
        Ok(())
    }

    pub fn schedule(&self) -> RefreshSchedule {
        let nominal = self.update_interval.max(MIN_UPDATE_INTERVAL);
        RefreshSchedule {
            nominal,
            ..RefreshSchedule::default()
        }
    }
}

/// Top-level configuration: a set of broker entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default, rename = "entry")]
    pub entries: Vec<EntryConfig>,
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        for entry in &config.entries {
            entry.validate()?;
        }
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_parses_from_toml_with_defaults() {
        let config: TrackerConfig = toml::from_str(
            r#"
            [[entry]]
            broker_name = "My Broker"
            import_dir = "/data/imports"
            update_interval = "30m"

            [entry.symbol_overrides]
            XAU = "GC=F"
            "#,
        )
        .unwrap();

        let entry = &config.entries[0];
        assert_eq!(entry.broker_type, BrokerType::Csv);
        assert_eq!(entry.base_currency, "EUR");
        assert_eq!(entry.update_interval, Duration::from_secs(30 * 60));
        assert_eq!(entry.symbol_overrides["XAU"], "GC=F");
        entry.validate().unwrap();
    }

    #[test]
    fn schedule_floors_the_interval() {
        let mut entry = EntryConfig::new("b", BrokerType::Manual);
        entry.update_interval = Duration::from_secs(60);
        assert_eq!(entry.schedule().nominal, Duration::from_secs(900));
    }

    #[test]
    fn csv_entry_without_import_dir_is_fatal() {
        let entry = EntryConfig::new("b", BrokerType::Csv);
        let err = entry.validate().unwrap_err();
        assert!(matches!(err, TrackerError::FatalConfiguration(_)));
    }

    #[test]
    fn empty_broker_name_is_fatal() {
        let entry = EntryConfig::new("  ", BrokerType::Manual);
        assert!(entry.validate().is_err());
    }
}
