//! Symbol mapping: broker-native spellings to canonical quote-source tickers.
//!
//! Mapping is a pure, static lookup. Resolution order: per-broker override
//! table, shared default table, then pass-through when the raw symbol already
//! looks canonical. Failure maps to `None`; the caller marks the asset
//! unmapped and must not fetch a quote for it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_TABLE: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolMap {
    /// Broker label (lowercase) -> raw symbol -> canonical symbol.
    /// The `"default"` table applies to every broker.
    tables: HashMap<String, HashMap<String, String>>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults carried over from shipped configurations.
    pub fn with_builtin_defaults() -> Self {
        let mut map = Self::new();
        map.insert(DEFAULT_TABLE, "XAU", "XAUUSD=X");
        map.insert(DEFAULT_TABLE, "VWCE", "VWCE.DE");
        map
    }

    pub fn insert(
        &mut self,
        broker: impl AsRef<str>,
        raw: impl AsRef<str>,
        canonical: impl Into<String>,
    ) {
        self.tables
            .entry(broker.as_ref().trim().to_lowercase())
            .or_default()
            .insert(raw.as_ref().trim().to_uppercase(), canonical.into());
    }

    /// Merge per-entry overrides on top of the built-in tables.
    pub fn extend_overrides(&mut self, broker: &str, overrides: &HashMap<String, String>) {
        for (raw, canonical) in overrides {
            self.insert(broker, raw, canonical.clone());
        }
    }

    /// Resolve a broker symbol. Pure and idempotent: the same inputs always
    /// produce the same output.
    pub fn map(&self, broker: &str, raw_symbol: &str) -> Option<String> {
        if let Some(mapped) = self.map_override(broker, raw_symbol) {
            return Some(mapped);
        }
        let symbol = raw_symbol.trim().to_uppercase();
        if is_canonical(&symbol) {
            return Some(symbol);
        }
        None
    }

    /// Table lookup only, skipping the canonical pass-through. For symbols
    /// an export already flags as unmapped: they may look like tickers but
    /// have proven not to quote, so only an explicit override resolves them.
    pub fn map_override(&self, broker: &str, raw_symbol: &str) -> Option<String> {
        let symbol = raw_symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return None;
        }
        let broker = broker.trim().to_lowercase();
        if let Some(mapped) = self.tables.get(&broker).and_then(|t| t.get(&symbol)) {
            return Some(mapped.clone());
        }
        self.tables
            .get(DEFAULT_TABLE)
            .and_then(|t| t.get(&symbol))
            .cloned()
    }
}

/// A symbol is already canonical when it is made of uppercase alphanumeric
/// segments joined by `.`, `-` or `=` (exchange suffix, share class, FX
/// pair). A bare segment with no suffix must be a short ticker; longer runs
/// like `XYZ123FUND99` are broker-internal fund identifiers, not quotable
/// symbols.
fn is_canonical(symbol: &str) -> bool {
    if symbol.is_empty() || symbol.len() > 12 {
        return false;
    }
    let mut segments = 0;
    for segment in symbol.split(['.', '-', '=']) {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return false;
        }
        segments += 1;
    }
    segments > 1 || symbol.len() <= 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_broker_override_wins_over_default() {
        let mut map = SymbolMap::with_builtin_defaults();
        map.insert("brokerx", "XAU", "GC=F");
        assert_eq!(map.map("BrokerX", "xau"), Some("GC=F".to_string()));
        assert_eq!(map.map("other", "XAU"), Some("XAUUSD=X".to_string()));
    }

    #[test]
    fn canonical_symbols_pass_through() {
        let map = SymbolMap::new();
        assert_eq!(map.map("b", "AAPL"), Some("AAPL".to_string()));
        assert_eq!(map.map("b", "VWCE.DE"), Some("VWCE.DE".to_string()));
        assert_eq!(map.map("b", "BRK-B"), Some("BRK-B".to_string()));
    }

    #[test]
    fn unresolvable_symbols_map_to_none() {
        let map = SymbolMap::new();
        assert_eq!(map.map("b", "not a ticker"), None);
        assert_eq!(map.map("b", "ISIN0012345678"), None);
        assert_eq!(map.map("b", ""), None);
        assert_eq!(map.map("b", "AAPL."), None);
    }

    #[test]
    fn fund_style_identifiers_do_not_pass_through() {
        let map = SymbolMap::new();
        assert_eq!(map.map("b", "XYZ123"), None);
        assert_eq!(map.map("b", "XYZ123FUND99"), None);
        // Short tickers with digits and suffixed forms still pass.
        assert_eq!(map.map("b", "BND1"), Some("BND1".to_string()));
        assert_eq!(map.map("b", "XAUUSD=X"), Some("XAUUSD=X".to_string()));
    }

    #[test]
    fn override_lookup_ignores_the_pass_through_heuristic() {
        let mut map = SymbolMap::new();
        assert_eq!(map.map_override("b", "AAPL"), None);
        map.insert("b", "AAPL", "AAPL.DE");
        assert_eq!(map.map_override("b", "AAPL"), Some("AAPL.DE".to_string()));
    }

    #[test]
    fn mapping_is_idempotent() {
        let map = SymbolMap::with_builtin_defaults();
        let first = map.map("b", "VWCE");
        let second = map.map("b", "VWCE");
        assert_eq!(first, second);
        assert_eq!(first, Some("VWCE.DE".to_string()));
    }
}
