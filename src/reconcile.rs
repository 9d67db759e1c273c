//! Merges parsed position rows, ledger-derived positions, and cached quotes
//! into the canonical asset set for one broker entry.
//!
//! Precedence: when the ledger knows a `(broker, symbol)` key, its replayed
//! quantity and cost basis supersede the raw position row; the row is the
//! fallback for brokers that never supply transaction detail. A key whose
//! resulting quantity is zero or negative is removed from the active set
//! (its ledger history stays retrievable).

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::Warning;
use crate::ingest::PositionRow;
use crate::ledger::TransactionLedger;
use crate::mapping::SymbolMap;
use crate::models::{Asset, AssetKey, AssetType, Transaction};
use crate::quotes::{QuoteCache, QuoteState};

/// Everything the reconciler needs for one entry.
pub struct ReconcileInput<'a> {
    pub rows: &'a HashMap<AssetKey, PositionRow>,
    pub ledger: &'a TransactionLedger,
    pub cache: &'a QuoteCache,
    pub mapper: &'a SymbolMap,
    pub base_currency: &'a str,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Active assets, sorted by key for deterministic snapshots.
    pub assets: Vec<Asset>,
    /// Raw symbols that failed mapping, sorted and deduped.
    pub unmapped_symbols: Vec<String>,
    pub realized_profit_loss: Decimal,
    pub warnings: Vec<Warning>,
}

/// Merge freshly parsed rows into the entry's accumulated position state.
/// Later imports override earlier ones per key, except that a user-pinned
/// `type` (manual_type) survives the merge.
pub fn merge_position_rows(
    current: &mut HashMap<AssetKey, PositionRow>,
    incoming: impl IntoIterator<Item = PositionRow>,
) {
    for row in incoming {
        let key = AssetKey::new(&row.broker, &row.symbol);
        match current.get_mut(&key) {
            Some(existing) if existing.manual_type => {
                let pinned = existing.asset_type;
                *existing = row;
                existing.asset_type = pinned;
                existing.manual_type = true;
            }
            Some(existing) => *existing = row,
            None => {
                current.insert(key, row);
            }
        }
    }
}

/// Transactions whose broker label matches no position are attributed to the
/// sole position broker holding that symbol, when unambiguous.
fn broker_aliases(
    rows: &HashMap<AssetKey, PositionRow>,
    ledger: &TransactionLedger,
) -> HashMap<AssetKey, AssetKey> {
    let mut brokers_by_symbol: HashMap<&str, Vec<&str>> = HashMap::new();
    for key in rows.keys() {
        brokers_by_symbol
            .entry(key.symbol.as_str())
            .or_default()
            .push(key.broker.as_str());
    }

    let mut aliases = HashMap::new();
    for tx in ledger.chronological() {
        let key = AssetKey::new(&tx.broker, &tx.symbol);
        if rows.contains_key(&key) || aliases.contains_key(&key) {
            continue;
        }
        if let Some(brokers) = brokers_by_symbol.get(key.symbol.as_str()) {
            if brokers.len() == 1 {
                aliases.insert(key.clone(), AssetKey::new(brokers[0], &key.symbol));
            }
        }
    }
    aliases
}

pub fn reconcile(input: ReconcileInput<'_>) -> ReconcileOutcome {
    let mut out = ReconcileOutcome::default();

    let aliases = broker_aliases(input.rows, input.ledger);
    let replay = input.ledger.replay_with_aliases(&aliases);
    out.realized_profit_loss = replay.realized_profit_loss;
    out.warnings.extend(replay.warnings.iter().cloned());

    // History per aliased key, chronological.
    let mut history: HashMap<AssetKey, Vec<Transaction>> = HashMap::new();
    for tx in input.ledger.chronological() {
        let mut key = AssetKey::new(&tx.broker, &tx.symbol);
        if let Some(target) = aliases.get(&key) {
            key = target.clone();
        }
        history.entry(key).or_default().push(tx.clone());
    }

    let mut keys: Vec<AssetKey> = input
        .rows
        .keys()
        .chain(replay.positions.keys())
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let row = input.rows.get(&key);
        let ledger_position = replay.positions.get(&key);

        // Ledger is the source of truth when present.
        let (quantity, avg_buy_price) = match ledger_position {
            Some(p) => (p.quantity, p.avg_buy_price),
            None => {
                let row = row.expect("key without row or ledger position");
                (row.quantity, row.avg_buy_price)
            }
        };

        if quantity <= Decimal::ZERO {
            continue;
        }

        let asset_type = row.map(|r| r.asset_type).unwrap_or(AssetType::Equity);

        // A row the export already flags as unmapped bypasses the
        // pass-through heuristic; only an explicit override resolves it.
        let canonical = if row.map(|r| r.unmapped_hint).unwrap_or(false) {
            input.mapper.map_override(&key.broker, &key.symbol)
        } else {
            input.mapper.map(&key.broker, &key.symbol)
        };
        if canonical.is_none() {
            out.warnings.push(Warning::mapping(&key.broker, &key.symbol));
            out.unmapped_symbols.push(key.symbol.clone());
        }

        let (current_price, last_price_update, quote_currency) = match &canonical {
            Some(symbol) => match input.cache.get(symbol) {
                QuoteState::Fresh(quote) | QuoteState::Stale { quote, .. } => (
                    Some(quote.price),
                    Some(quote.timestamp),
                    Some(quote.currency.clone()),
                ),
                // Mapped but never quoted yet: fall back to the export's own
                // price column when it carried one.
                QuoteState::Missing => match row {
                    Some(r) => (r.current_price, r.last_price_update, None),
                    None => (None, None, None),
                },
            },
            None => (None, None, None),
        };

        let currency = quote_currency
            .filter(|c| !c.is_empty())
            .or_else(|| row.map(|r| r.currency.clone()))
            .or_else(|| ledger_position.map(|p| p.currency.clone()))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| input.base_currency.to_string());

        let derived = derive_valuation(asset_type, quantity, avg_buy_price, current_price);

        out.assets.push(Asset {
            broker: key.broker.clone(),
            symbol: key.symbol.clone(),
            name: row
                .map(|r| r.name.clone())
                .unwrap_or_else(|| key.symbol.clone()),
            asset_type,
            quantity,
            avg_buy_price,
            currency,
            current_price,
            market_value: derived.market_value,
            profit_loss_abs: derived.profit_loss_abs,
            profit_loss_pct: derived.profit_loss_pct,
            unmapped: canonical.is_none(),
            manual_type: row.map(|r| r.manual_type).unwrap_or(false),
            integrity_flagged: replay.flagged.contains(&key),
            last_price_update,
            transactions: history.remove(&key).unwrap_or_default(),
        });
    }

    out.unmapped_symbols.sort();
    out.unmapped_symbols.dedup();
    out
}

struct Valuation {
    market_value: Option<Decimal>,
    profit_loss_abs: Option<Decimal>,
    profit_loss_pct: Decimal,
}

/// Derived fields. Bonds quote in percent of face value, so their market
/// value and profit scale by 1/100; a bond with no recorded cost basis falls
/// back to the current price (flat position).
fn derive_valuation(
    asset_type: AssetType,
    quantity: Decimal,
    avg_buy_price: Decimal,
    current_price: Option<Decimal>,
) -> Valuation {
    let Some(price) = current_price else {
        return Valuation {
            market_value: None,
            profit_loss_abs: None,
            profit_loss_pct: Decimal::ZERO,
        };
    };

    let effective_avg = if asset_type == AssetType::Bond && avg_buy_price <= Decimal::ZERO {
        price
    } else {
        avg_buy_price
    };

    let scale = if asset_type == AssetType::Bond {
        Decimal::ONE_HUNDRED
    } else {
        Decimal::ONE
    };

    let market_value = price / scale * quantity;
    let profit_loss_abs = (price - effective_avg) / scale * quantity;
    let profit_loss_pct = if effective_avg > Decimal::ZERO {
        (price - effective_avg) / effective_avg
    } else {
        Decimal::ZERO
    };

    Valuation {
        market_value: Some(market_value),
        profit_loss_abs: Some(profit_loss_abs),
        profit_loss_pct,
    }
}
