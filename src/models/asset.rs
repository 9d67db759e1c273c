use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Transaction;

/// Closed set of asset categories understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Equity,
    Etf,
    Bond,
    Commodity,
    Crypto,
    Cash,
}

impl AssetType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "equity" | "stock" => Some(AssetType::Equity),
            "etf" => Some(AssetType::Etf),
            "bond" => Some(AssetType::Bond),
            "commodity" => Some(AssetType::Commodity),
            "crypto" | "cryptocurrency" => Some(AssetType::Crypto),
            "cash" => Some(AssetType::Cash),
            _ => None,
        }
    }
}

/// Composite identity of a held position: `(broker, symbol)`.
///
/// Broker labels are normalized to lowercase and symbols to uppercase so that
/// every source of the same position lands on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    pub broker: String,
    pub symbol: String,
}

impl AssetKey {
    pub fn new(broker: impl AsRef<str>, symbol: impl AsRef<str>) -> Self {
        let broker = broker.as_ref().trim().to_lowercase();
        Self {
            broker: if broker.is_empty() {
                "unknown".to_string()
            } else {
                broker
            },
            symbol: symbol.as_ref().trim().to_uppercase(),
        }
    }
}

impl std::fmt::Display for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.broker, self.symbol)
    }
}

/// One held position for one `(broker, symbol)` pair, with all derived
/// valuation fields populated by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub broker: String,
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub quantity: Decimal,
    pub avg_buy_price: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    /// `quantity * current_price`; absent while unmapped or unquoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_loss_abs: Option<Decimal>,
    /// Ratio, not percent. Zero when `avg_buy_price` is zero.
    pub profit_loss_pct: Decimal,
    pub unmapped: bool,
    /// The position's `type` was pinned by the user and must not be
    /// overwritten by later merges.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual_type: bool,
    /// Set when ledger replay had to clamp an oversell for this position.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub integrity_flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_price_update: Option<DateTime<Utc>>,
    /// Chronological transaction history affecting this position.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Transaction>,
}

impl Asset {
    pub fn key(&self) -> AssetKey {
        AssetKey::new(&self.broker, &self.symbol)
    }

    /// Cost basis contribution: `avg_buy_price * quantity`, counted toward
    /// invested totals whether or not the asset is mapped. Bonds quote in
    /// percent of face value.
    pub fn invested(&self) -> Decimal {
        if self.asset_type == AssetType::Bond {
            self.avg_buy_price / Decimal::ONE_HUNDRED * self.quantity
        } else {
            self.avg_buy_price * self.quantity
        }
    }
}
