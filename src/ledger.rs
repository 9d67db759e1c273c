//! Append-only, idempotent store of buy/sell events per `(broker, symbol)`.
//!
//! Positions and cost basis are rebuilt by replaying accepted transactions in
//! chronological order with a running-average cost basis: buys move the
//! average, sells realize profit against it without changing it. Re-appending
//! a transaction with the same natural key is a no-op, so reprocessing a full
//! transaction file after a partial prior import is safe.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use tracing::debug;

use crate::error::Warning;
use crate::models::{AssetKey, Transaction, TransactionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    Duplicate,
}

/// Running position state for one key after replay. A quantity of zero means
/// the ledger closed the position; the key still supersedes any raw position
/// row for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedPosition {
    pub quantity: Decimal,
    pub avg_buy_price: Decimal,
    /// Currency of the most recent transaction touching the key.
    pub currency: String,
}

/// Outcome of a full ledger replay.
#[derive(Debug, Default)]
pub struct LedgerPositions {
    pub positions: HashMap<AssetKey, ReplayedPosition>,
    /// Profit locked in by sells, average-cost method, across all keys.
    pub realized_profit_loss: Decimal,
    /// Keys where a sell had to be clamped to the held quantity.
    pub flagged: HashSet<AssetKey>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Default)]
pub struct TransactionLedger {
    transactions: Vec<Transaction>,
    seen: HashSet<TransactionKey>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event; duplicates (by natural key) are ignored.
    pub fn append(&mut self, tx: Transaction) -> AppendOutcome {
        if !self.seen.insert(tx.key()) {
            debug!(broker = %tx.broker, symbol = %tx.symbol, date = %tx.date, "duplicate transaction ignored");
            return AppendOutcome::Duplicate;
        }
        self.transactions.push(tx);
        AppendOutcome::Accepted
    }

    /// Append many events, returning `(accepted, duplicates)` counts.
    pub fn append_all(&mut self, txns: impl IntoIterator<Item = Transaction>) -> (usize, usize) {
        let mut accepted = 0;
        let mut duplicates = 0;
        for tx in txns {
            match self.append(tx) {
                AppendOutcome::Accepted => accepted += 1,
                AppendOutcome::Duplicate => duplicates += 1,
            }
        }
        (accepted, duplicates)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// All accepted events in chronological order (insertion order breaks
    /// date ties, matching the order they were parsed).
    pub fn chronological(&self) -> Vec<&Transaction> {
        let mut txns: Vec<&Transaction> = self.transactions.iter().collect();
        txns.sort_by_key(|tx| tx.date);
        txns
    }

    /// History for one key, chronological. Survives the position reaching
    /// zero quantity.
    pub fn transactions_for(&self, broker: &str, symbol: &str) -> Vec<Transaction> {
        let key = AssetKey::new(broker, symbol);
        self.chronological()
            .into_iter()
            .filter(|tx| tx.broker == key.broker && tx.symbol == key.symbol)
            .cloned()
            .collect()
    }

    /// Replay the full ledger. `aliases` re-keys transactions whose broker
    /// label matches no position file (e.g. a sub-account label) onto the key
    /// actually holding the symbol; pass an empty map for plain replay.
    pub fn replay_with_aliases(&self, aliases: &HashMap<AssetKey, AssetKey>) -> LedgerPositions {
        let mut out = LedgerPositions::default();

        for tx in self.chronological() {
            let mut key = AssetKey::new(&tx.broker, &tx.symbol);
            if let Some(target) = aliases.get(&key) {
                key = target.clone();
            }

            let entry = out.positions.entry(key.clone()).or_insert(ReplayedPosition {
                quantity: Decimal::ZERO,
                avg_buy_price: Decimal::ZERO,
                currency: tx.currency.clone(),
            });
            if !tx.currency.is_empty() {
                entry.currency = tx.currency.clone();
            }

            if tx.quantity > Decimal::ZERO {
                let new_quantity = entry.quantity + tx.quantity;
                let total_cost =
                    entry.avg_buy_price * entry.quantity + tx.price * tx.quantity;
                entry.avg_buy_price = if new_quantity > Decimal::ZERO {
                    total_cost / new_quantity
                } else {
                    Decimal::ZERO
                };
                entry.quantity = new_quantity;
            } else {
                let sell_quantity = -tx.quantity;
                let available = entry.quantity.max(Decimal::ZERO);
                let used = sell_quantity.min(available);
                out.realized_profit_loss += (tx.price - entry.avg_buy_price) * used;

                if sell_quantity > available {
                    out.flagged.insert(key.clone());
                    out.warnings.push(Warning::ledger(
                        &key.broker,
                        &key.symbol,
                        format!(
                            "sell of {sell_quantity} exceeds held quantity {available}; clamped"
                        ),
                    ));
                }

                entry.quantity = (entry.quantity - sell_quantity).max(Decimal::ZERO);
                if entry.quantity == Decimal::ZERO {
                    entry.avg_buy_price = Decimal::ZERO;
                }
            }
        }

        out
    }

    pub fn replay(&self) -> LedgerPositions {
        self.replay_with_aliases(&HashMap::new())
    }

    /// Quantity and average cost for one key, if the ledger knows it.
    pub fn positions_for(&self, broker: &str, symbol: &str) -> Option<(Decimal, Decimal)> {
        let key = AssetKey::new(broker, symbol);
        self.replay()
            .positions
            .get(&key)
            .map(|p| (p.quantity, p.avg_buy_price))
    }

    /// Total realized profit/loss across the whole ledger.
    pub fn realized_profit_loss(&self) -> Decimal {
        self.replay().realized_profit_loss
    }
}
