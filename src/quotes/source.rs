use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::Quote;

/// Port to an external quote provider. Treated as unreliable and
/// rate-limited; callers bound every fetch with a timeout and feed failures
/// into the cache's staleness handling.
#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch the latest price for one canonical symbol.
    async fn fetch(&self, symbol: &str) -> Result<Quote>;

    fn name(&self) -> &str;
}

/// Source that never returns data. Useful for entries that only track cost
/// basis.
pub struct NoopQuoteSource;

#[async_trait::async_trait]
impl QuoteSource for NoopQuoteSource {
    async fn fetch(&self, symbol: &str) -> Result<Quote> {
        Err(anyhow!("no quote source configured for {symbol}"))
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Scripted in-process source for tests and offline runs: fixed quotes per
/// symbol, with optional per-symbol failure injection.
#[derive(Default)]
pub struct StaticQuoteSource {
    quotes: Mutex<HashMap<String, Quote>>,
    failing: Mutex<HashSet<String>>,
}

impl StaticQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(
        &self,
        symbol: &str,
        price: Decimal,
        currency: &str,
        timestamp: DateTime<Utc>,
    ) {
        let symbol = symbol.to_uppercase();
        self.quotes.lock().expect("quotes lock poisoned").insert(
            symbol.clone(),
            Quote {
                symbol,
                price,
                currency: currency.to_string(),
                timestamp,
                source: "static".to_string(),
            },
        );
    }

    /// Make subsequent fetches for `symbol` fail until cleared.
    pub fn set_failing(&self, symbol: &str, failing: bool) {
        let mut set = self.failing.lock().expect("failing lock poisoned");
        if failing {
            set.insert(symbol.to_uppercase());
        } else {
            set.remove(&symbol.to_uppercase());
        }
    }
}

#[async_trait::async_trait]
impl QuoteSource for StaticQuoteSource {
    async fn fetch(&self, symbol: &str) -> Result<Quote> {
        let symbol = symbol.to_uppercase();
        if self
            .failing
            .lock()
            .expect("failing lock poisoned")
            .contains(&symbol)
        {
            return Err(anyhow!("simulated provider failure for {symbol}"));
        }
        self.quotes
            .lock()
            .expect("quotes lock poisoned")
            .get(&symbol)
            .cloned()
            .ok_or_else(|| anyhow!("no quote for {symbol}"))
    }

    fn name(&self) -> &str {
        "static"
    }
}
