use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One buy or sell event. Quantity is signed: positive buys, negative sells.
///
/// Immutable once ingested. Owned by the ledger; assets reference the
/// transactions that affect them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub broker: String,
    pub symbol: String,
    pub date: NaiveDate,
    pub quantity: Decimal,
    pub price: Decimal,
    pub currency: String,
}

impl Transaction {
    pub fn new(
        broker: impl AsRef<str>,
        symbol: impl AsRef<str>,
        date: NaiveDate,
        quantity: Decimal,
        price: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            broker: broker.as_ref().trim().to_lowercase(),
            symbol: symbol.as_ref().trim().to_uppercase(),
            date,
            quantity,
            price,
            currency: currency.into(),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Natural key used for idempotent re-ingestion: re-appending a
    /// transaction with the same key is a no-op.
    pub fn key(&self) -> TransactionKey {
        TransactionKey {
            broker: self.broker.clone(),
            symbol: self.symbol.clone(),
            date: self.date,
            quantity: self.quantity.normalize(),
            price: self.price.normalize(),
        }
    }
}

/// Deduplication key: `(broker, symbol, date, quantity, price)` with decimals
/// normalized so `1.50` and `1.5` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub broker: String,
    pub symbol: String,
    pub date: NaiveDate,
    pub quantity: Decimal,
    pub price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn key_ignores_decimal_scale() {
        let a = Transaction::new("X", "AAPL", date("2026-01-05"), d("1.50"), d("10"), "USD");
        let b = Transaction::new("x", "aapl", date("2026-01-05"), d("1.5"), d("10.0"), "USD");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn key_distinguishes_price() {
        let a = Transaction::new("X", "AAPL", date("2026-01-05"), d("1"), d("10"), "USD");
        let b = Transaction::new("X", "AAPL", date("2026-01-05"), d("1"), d("11"), "USD");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn sell_is_not_buy() {
        let tx = Transaction::new("X", "AAPL", date("2026-01-05"), d("-2"), d("10"), "USD");
        assert!(!tx.is_buy());
    }
}
