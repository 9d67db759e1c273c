//! The read-only structure handed to the sensor/UI layer.
//!
//! A snapshot is recomputed, never patched: each successful reconciliation
//! builds a fresh one and swaps it in atomically, so readers never observe a
//! half-updated view and a failed refresh leaves the previous snapshot
//! untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Warning;
use crate::models::{Asset, BrokerEntry};
use crate::portfolio::PortfolioTotals;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Monotonic per entry; bumps on every successful reconciliation.
    pub version: u64,
    pub generated_at: DateTime<Utc>,
    pub broker: BrokerEntry,
    pub assets: Vec<Asset>,
    /// Raw symbols that failed mapping, for the host's repair surface.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmapped_symbols: Vec<String>,
    pub totals: PortfolioTotals,
    /// Row/symbol-scoped problems from the producing refresh cycle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl PortfolioSnapshot {
    /// Initial snapshot for a just-configured entry: no assets, version 0.
    pub fn initial(broker: BrokerEntry, base_currency: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            generated_at,
            broker,
            assets: Vec::new(),
            unmapped_symbols: Vec::new(),
            totals: PortfolioTotals::empty(base_currency),
            warnings: Vec::new(),
        }
    }

    pub fn asset(&self, broker: &str, symbol: &str) -> Option<&Asset> {
        let broker = broker.trim().to_lowercase();
        let symbol = symbol.trim().to_uppercase();
        self.assets
            .iter()
            .find(|a| a.broker == broker && a.symbol == symbol)
    }
}
