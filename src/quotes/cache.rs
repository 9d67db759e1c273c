//! Most-recent-quote cache with explicit staleness states.
//!
//! Readers can distinguish "never fetched" from "stale due to failure" from
//! "fresh". A failed fetch retains the last known value; it is annotated as
//! stale, never evicted. Writes are last-writer-wins by quote timestamp so an
//! older in-flight fetch cannot clobber fresher data.

use std::collections::HashMap;

use tracing::debug;

use super::Quote;

#[derive(Debug)]
struct CacheSlot {
    quote: Quote,
    stale: bool,
    /// Consecutive fetch failures since the quote was last refreshed.
    failures: u32,
}

/// Read view of one symbol's cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteState {
    Fresh(Quote),
    Stale { quote: Quote, failures: u32 },
    Missing,
}

impl QuoteState {
    pub fn quote(&self) -> Option<&Quote> {
        match self {
            QuoteState::Fresh(q) => Some(q),
            QuoteState::Stale { quote, .. } => Some(quote),
            QuoteState::Missing => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, QuoteState::Stale { .. })
    }
}

#[derive(Debug, Default)]
pub struct QuoteCache {
    slots: HashMap<String, CacheSlot>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> QuoteState {
        match self.slots.get(&symbol.to_uppercase()) {
            Some(slot) if slot.stale => QuoteState::Stale {
                quote: slot.quote.clone(),
                failures: slot.failures,
            },
            Some(slot) => QuoteState::Fresh(slot.quote.clone()),
            None => QuoteState::Missing,
        }
    }

    /// Store a fetched quote. Returns false when a fresher quote is already
    /// cached and the write was discarded.
    pub fn put(&mut self, quote: Quote) -> bool {
        let key = quote.symbol.to_uppercase();
        if let Some(existing) = self.slots.get(&key) {
            if existing.quote.timestamp > quote.timestamp {
                debug!(
                    symbol = %key,
                    cached = %existing.quote.timestamp,
                    incoming = %quote.timestamp,
                    "discarding out-of-order quote"
                );
                return false;
            }
        }
        self.slots.insert(
            key,
            CacheSlot {
                quote,
                stale: false,
                failures: 0,
            },
        );
        true
    }

    /// Record a fetch failure: the last value stays readable, marked stale.
    pub fn mark_stale_but_retain(&mut self, symbol: &str) {
        if let Some(slot) = self.slots.get_mut(&symbol.to_uppercase()) {
            slot.stale = true;
            slot.failures = slot.failures.saturating_add(1);
        }
    }

    /// Drop a symbol once no entry references it anymore.
    pub fn remove(&mut self, symbol: &str) {
        self.slots.remove(&symbol.to_uppercase());
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
