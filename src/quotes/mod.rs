//! Market quotes: the fetch port and the staleness-aware cache.

mod cache;
mod source;

pub use cache::{QuoteCache, QuoteState};
pub use source::{NoopQuoteSource, QuoteSource, StaticQuoteSource};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One fetched price. Transient: lives only in the quote cache and is rebuilt
/// by the first successful fetch cycle after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}
