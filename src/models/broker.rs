use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a broker entry's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerType {
    Api,
    Csv,
    Manual,
}

/// One configured data source. A single CSV-import entry can surface several
/// broker labels (e.g. a main account and a sub-account in the same
/// directory), collected in `broker_slugs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerEntry {
    pub broker_name: String,
    pub broker_type: BrokerType,
    /// Flips on each refresh outcome.
    pub connected: bool,
    /// Distinct lowercase broker labels encountered under this entry.
    #[serde(default)]
    pub broker_slugs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
}

impl BrokerEntry {
    pub fn new(broker_name: impl Into<String>, broker_type: BrokerType) -> Self {
        Self {
            broker_name: broker_name.into(),
            broker_type,
            connected: false,
            broker_slugs: Vec::new(),
            last_refresh: None,
        }
    }

    /// Record a broker label seen in ingested data, keeping the list sorted
    /// and duplicate-free.
    pub fn record_slug(&mut self, slug: &str) {
        let slug = slug.trim().to_lowercase();
        if slug.is_empty() {
            return;
        }
        if let Err(pos) = self.broker_slugs.binary_search(&slug) {
            self.broker_slugs.insert(pos, slug);
        }
    }
}
