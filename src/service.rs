//! Entry lifecycle and the refresh cycle.
//!
//! `TrackerService` owns the configured broker entries and runs each entry's
//! refresh: scan the import directory, ingest new CSVs, fetch quotes for the
//! mapped symbols, reconcile, and publish a fresh snapshot. Per-entry state is
//! guarded by an async mutex so cycles for one entry never interleave;
//! readers always see the last published snapshot through a cheap Arc swap.
//! Import files are renamed `.processed.{ts}` only after their data has made
//! it into a published snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{EntryConfig, TrackerConfig};
use crate::error::{TrackerError, Warning};
use crate::ingest::{
    normalize_csv, parse_positions, parse_transactions, scan_import_dir,
    scan_processed_transactions, ImportBatch, ImportFile, MarkProcessed, PositionRow,
};
use crate::ledger::TransactionLedger;
use crate::mapping::SymbolMap;
use crate::models::{AssetKey, AssetType, BrokerEntry, BrokerType};
use crate::portfolio;
use crate::quotes::{QuoteCache, QuoteSource};
use crate::reconcile::{merge_position_rows, reconcile, ReconcileInput};
use crate::refresh::RefreshDriver;
use crate::snapshot::PortfolioSnapshot;

struct EntryInner {
    broker: BrokerEntry,
    ledger: TransactionLedger,
    rows: HashMap<AssetKey, PositionRow>,
    mapper: SymbolMap,
    driver: RefreshDriver,
    version: u64,
}

struct EntryState {
    config: EntryConfig,
    /// Bumped on removal so an in-flight cycle discards its result.
    generation: AtomicU64,
    snapshot: RwLock<Arc<PortfolioSnapshot>>,
    inner: tokio::sync::Mutex<EntryInner>,
}

struct CycleIngest {
    /// Files whose content was fully read and parsed this cycle.
    ingested: Vec<ImportFile>,
    rows_parsed: usize,
    txns_accepted: usize,
}

pub struct TrackerService {
    clock: Arc<dyn Clock>,
    source: Arc<dyn QuoteSource>,
    /// Shared across entries: two entries holding the same canonical symbol
    /// reuse one quote.
    cache: tokio::sync::Mutex<QuoteCache>,
    entries: RwLock<HashMap<String, Arc<EntryState>>>,
}

fn entry_slug(name: &str) -> String {
    name.trim().to_lowercase()
}

impl TrackerService {
    pub fn new(clock: Arc<dyn Clock>, source: Arc<dyn QuoteSource>) -> Self {
        Self {
            clock,
            source,
            cache: tokio::sync::Mutex::new(QuoteCache::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &TrackerConfig,
        clock: Arc<dyn Clock>,
        source: Arc<dyn QuoteSource>,
    ) -> Result<Self> {
        let service = Self::new(clock, source);
        for entry in &config.entries {
            service.add_entry(entry.clone())?;
        }
        Ok(service)
    }

    /// Register a broker entry and publish its empty initial snapshot.
    pub fn add_entry(&self, config: EntryConfig) -> Result<()> {
        config.validate()?;
        let slug = entry_slug(&config.broker_name);
        let mut entries = self.entries.write().expect("entries lock poisoned");
        if entries.contains_key(&slug) {
            return Err(TrackerError::FatalConfiguration(format!(
                "duplicate entry '{}'",
                config.broker_name
            ))
            .into());
        }

        let mut mapper = SymbolMap::with_builtin_defaults();
        mapper.extend_overrides(&slug, &config.symbol_overrides);

        let broker = BrokerEntry::new(&config.broker_name, config.broker_type);
        let initial = Arc::new(PortfolioSnapshot::initial(
            broker.clone(),
            &config.base_currency,
            self.clock.now(),
        ));
        let driver = RefreshDriver::new(config.schedule());

        info!(entry = %slug, broker_type = ?config.broker_type, "entry added");
        entries.insert(
            slug,
            Arc::new(EntryState {
                config,
                generation: AtomicU64::new(0),
                snapshot: RwLock::new(initial),
                inner: tokio::sync::Mutex::new(EntryInner {
                    broker,
                    ledger: TransactionLedger::new(),
                    rows: HashMap::new(),
                    mapper,
                    driver,
                    version: 0,
                }),
            }),
        );
        Ok(())
    }

    /// Remove an entry. An in-flight refresh for it finishes its work but
    /// never publishes.
    pub fn remove_entry(&self, name: &str) -> bool {
        let slug = entry_slug(name);
        let removed = self
            .entries
            .write()
            .expect("entries lock poisoned")
            .remove(&slug);
        match removed {
            Some(entry) => {
                entry.generation.fetch_add(1, Ordering::SeqCst);
                info!(entry = %slug, "entry removed");
                true
            }
            None => false,
        }
    }

    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .expect("entries lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Last published snapshot for an entry.
    pub fn snapshot(&self, name: &str) -> Option<Arc<PortfolioSnapshot>> {
        let entries = self.entries.read().expect("entries lock poisoned");
        entries
            .get(&entry_slug(name))
            .map(|e| e.snapshot.read().expect("snapshot lock poisoned").clone())
    }

    /// How long the scheduler should wait before the entry's next refresh.
    pub async fn next_delay(&self, name: &str) -> Result<std::time::Duration> {
        let entry = self.entry(name)?;
        let inner = entry.inner.lock().await;
        Ok(inner.driver.next_delay())
    }

    fn entry(&self, name: &str) -> Result<Arc<EntryState>> {
        self.entries
            .read()
            .expect("entries lock poisoned")
            .get(&entry_slug(name))
            .cloned()
            .ok_or_else(|| anyhow!("unknown entry '{name}'"))
    }

    /// Run one full refresh cycle for an entry. On error the previous
    /// snapshot stays published and the entry goes into backoff.
    pub async fn refresh(&self, name: &str) -> Result<Arc<PortfolioSnapshot>> {
        let entry = self.entry(name)?;
        let generation = entry.generation.load(Ordering::SeqCst);
        let mut inner = entry.inner.lock().await;
        inner.driver.on_tick();

        match self.run_cycle(&entry, &mut inner, generation).await {
            Ok((snapshot, fetch_failures)) => {
                if fetch_failures == 0 {
                    inner.driver.on_success();
                } else {
                    inner.driver.on_failure();
                }
                Ok(snapshot)
            }
            Err(e) => {
                warn!(entry = %entry_slug(name), error = %e, "refresh cycle failed");
                inner.driver.on_failure();
                inner.broker.connected = false;
                // The last good data stays published, but it must stop
                // advertising a live connection.
                if entry.generation.load(Ordering::SeqCst) == generation {
                    let mut slot = entry.snapshot.write().expect("snapshot lock poisoned");
                    if slot.broker.connected {
                        let mut patched = PortfolioSnapshot::clone(slot.as_ref());
                        patched.broker.connected = false;
                        *slot = Arc::new(patched);
                    }
                }
                Err(e)
            }
        }
    }

    /// Refresh every entry, collecting per-entry failures instead of
    /// stopping at the first one.
    pub async fn refresh_all(&self) -> Vec<(String, anyhow::Error)> {
        let mut failures = Vec::new();
        for name in self.entry_names() {
            if let Err(e) = self.refresh(&name).await {
                failures.push((name, e));
            }
        }
        failures
    }

    async fn run_cycle(
        &self,
        entry: &Arc<EntryState>,
        inner: &mut EntryInner,
        generation: u64,
    ) -> Result<(Arc<PortfolioSnapshot>, usize)> {
        let mut warnings = Vec::new();

        let batch = match (&entry.config.broker_type, &entry.config.import_dir) {
            (BrokerType::Csv, Some(dir)) => scan_import_dir(dir)?,
            _ => ImportBatch::default(),
        };
        let ingest = self.ingest_batch(entry, inner, &batch, &mut warnings);

        // Every parseable input rejected: surface it instead of silently
        // publishing an unchanged snapshot over broken files.
        if !batch.is_empty()
            && ingest.rows_parsed == 0
            && ingest.txns_accepted == 0
            && inner.rows.is_empty()
            && inner.ledger.is_empty()
        {
            return Err(TrackerError::Ingest {
                entry: entry.config.broker_name.clone(),
                reason: "no row of any input could be parsed".to_string(),
            }
            .into());
        }

        let symbols = canonical_symbols(inner);
        let mut fetch_failures = 0;
        for symbol in &symbols {
            // Fetch without holding the cache lock so entries with disjoint
            // symbols do not serialize on each other; `put` arbitrates
            // same-symbol races by timestamp.
            let fetched =
                tokio::time::timeout(entry.config.fetch_timeout, self.source.fetch(symbol)).await;
            let mut cache = self.cache.lock().await;
            match fetched {
                Ok(Ok(quote)) => {
                    debug!(symbol = %symbol, price = %quote.price, source = %quote.source, "quote fetched");
                    cache.put(quote);
                }
                Ok(Err(e)) => {
                    fetch_failures += 1;
                    cache.mark_stale_but_retain(symbol);
                    warnings.push(Warning::fetch(symbol, e.to_string()));
                }
                Err(_) => {
                    fetch_failures += 1;
                    cache.mark_stale_but_retain(symbol);
                    warnings.push(Warning::fetch(
                        symbol,
                        format!(
                            "timed out after {}s",
                            entry.config.fetch_timeout.as_secs()
                        ),
                    ));
                }
            }
        }

        let cache = self.cache.lock().await;
        let snapshot =
            self.publish(entry, inner, &cache, generation, warnings, fetch_failures == 0)?;
        drop(cache);

        let ts = self.clock.now().timestamp();
        for file in &ingest.ingested {
            if let Err(e) = MarkProcessed::rename(file, ts) {
                warn!(file = %file.file_label(), error = %e, "failed to mark file processed");
            }
        }

        Ok((snapshot, fetch_failures))
    }

    /// Read and parse one scanned batch into the entry's state. Files that
    /// cannot be read are skipped (and stay unprocessed for the next cycle).
    fn ingest_batch(
        &self,
        entry: &EntryState,
        inner: &mut EntryInner,
        batch: &ImportBatch,
        warnings: &mut Vec<Warning>,
    ) -> CycleIngest {
        let mut ingest = CycleIngest {
            ingested: Vec::new(),
            rows_parsed: 0,
            txns_accepted: 0,
        };

        for file in &batch.transactions {
            let label = file.file_label();
            let content = match file.read() {
                Ok(c) => c,
                Err(e) => {
                    warnings.push(Warning::parse(&label, 0, e.to_string()));
                    continue;
                }
            };
            let content = normalize_csv(&content, entry.config.format);
            let parsed = parse_transactions(&content, &label, &file.broker);
            warnings.extend(parsed.warnings);
            for tx in &parsed.rows {
                inner.broker.record_slug(&tx.broker);
            }
            let parsed_rows = parsed.rows.len();
            let (accepted, duplicates) = inner.ledger.append_all(parsed.rows);
            info!(file = %label, accepted, duplicates, "transaction file ingested");
            ingest.txns_accepted += accepted;
            // A file with nothing parseable stays in place for repair.
            if parsed_rows > 0 {
                ingest.ingested.push(file.clone());
            }
        }

        for file in &batch.positions {
            let label = file.file_label();
            let content = match file.read() {
                Ok(c) => c,
                Err(e) => {
                    warnings.push(Warning::parse(&label, 0, e.to_string()));
                    continue;
                }
            };
            let content = normalize_csv(&content, entry.config.format);
            let parsed =
                parse_positions(&content, &label, &file.broker, &entry.config.base_currency);
            warnings.extend(parsed.warnings);
            for row in &parsed.rows {
                inner.broker.record_slug(&row.broker);
            }
            info!(file = %label, rows = parsed.rows.len(), "position file ingested");
            ingest.rows_parsed += parsed.rows.len();
            let parsed_rows = parsed.rows.len();
            merge_position_rows(&mut inner.rows, parsed.rows);
            if parsed_rows > 0 {
                ingest.ingested.push(file.clone());
            }
        }

        ingest
    }

    /// Reconcile current state against the cache and swap in a new snapshot,
    /// unless the entry was removed while the cycle ran.
    fn publish(
        &self,
        entry: &Arc<EntryState>,
        inner: &mut EntryInner,
        cache: &QuoteCache,
        generation: u64,
        mut warnings: Vec<Warning>,
        cycle_ok: bool,
    ) -> Result<Arc<PortfolioSnapshot>> {
        let outcome = reconcile(ReconcileInput {
            rows: &inner.rows,
            ledger: &inner.ledger,
            cache,
            mapper: &inner.mapper,
            base_currency: &entry.config.base_currency,
        });
        warnings.extend(outcome.warnings);
        for warning in &warnings {
            warning.log();
        }

        let totals = portfolio::aggregate(
            &outcome.assets,
            outcome.realized_profit_loss,
            &entry.config.base_currency,
        );

        inner.broker.connected = cycle_ok;
        inner.broker.last_refresh = Some(self.clock.now());
        inner.version += 1;

        let snapshot = Arc::new(PortfolioSnapshot {
            version: inner.version,
            generated_at: self.clock.now(),
            broker: inner.broker.clone(),
            assets: outcome.assets,
            unmapped_symbols: outcome.unmapped_symbols,
            totals,
            warnings,
        });

        if entry.generation.load(Ordering::SeqCst) != generation {
            return Err(anyhow!("entry removed during refresh"));
        }
        *entry.snapshot.write().expect("snapshot lock poisoned") = snapshot.clone();
        debug!(version = snapshot.version, assets = snapshot.assets.len(), "snapshot published");
        Ok(snapshot)
    }

    /// Fetch one symbol's quote immediately and republish, leaving the rest
    /// of the cache untouched.
    pub async fn refresh_asset(&self, name: &str, symbol: &str) -> Result<Arc<PortfolioSnapshot>> {
        let entry = self.entry(name)?;
        let generation = entry.generation.load(Ordering::SeqCst);
        let mut inner = entry.inner.lock().await;

        let symbol_uc = symbol.trim().to_uppercase();
        let broker = inner
            .rows
            .keys()
            .find(|k| k.symbol == symbol_uc)
            .map(|k| k.broker.clone())
            .unwrap_or_default();
        let canonical = inner
            .mapper
            .map(&broker, &symbol_uc)
            .ok_or_else(|| anyhow!("symbol '{symbol_uc}' is unmapped"))?;

        let mut warnings = Vec::new();
        let fetched =
            tokio::time::timeout(entry.config.fetch_timeout, self.source.fetch(&canonical)).await;
        let mut cache = self.cache.lock().await;
        let ok = match fetched {
            Ok(Ok(quote)) => {
                cache.put(quote);
                true
            }
            Ok(Err(e)) => {
                cache.mark_stale_but_retain(&canonical);
                warnings.push(Warning::fetch(&canonical, e.to_string()));
                false
            }
            Err(_) => {
                cache.mark_stale_but_retain(&canonical);
                warnings.push(Warning::fetch(
                    &canonical,
                    format!("timed out after {}s", entry.config.fetch_timeout.as_secs()),
                ));
                false
            }
        };

        self.publish(&entry, &mut inner, &cache, generation, warnings, ok)
    }

    /// Override the canonical mapping for a raw symbol and republish. The
    /// override lands in the entry's own table, so it wins over defaults.
    pub async fn remap_symbol(
        &self,
        name: &str,
        raw: &str,
        canonical: &str,
    ) -> Result<Arc<PortfolioSnapshot>> {
        if raw.trim().is_empty() || canonical.trim().is_empty() {
            return Err(anyhow!("remap requires both a raw and a canonical symbol"));
        }
        let entry = self.entry(name)?;
        let generation = entry.generation.load(Ordering::SeqCst);
        let mut inner = entry.inner.lock().await;

        let slug = entry_slug(&entry.config.broker_name);
        inner.mapper.insert(&slug, raw, canonical.trim().to_string());
        // The rows carry their own broker labels; cover those spellings too.
        let brokers: Vec<String> = inner.rows.keys().map(|k| k.broker.clone()).collect();
        for broker in brokers {
            inner.mapper.insert(&broker, raw, canonical.trim().to_string());
        }
        info!(entry = %slug, raw = %raw, canonical = %canonical, "symbol remapped");

        let cache = self.cache.lock().await;
        self.publish(&entry, &mut inner, &cache, generation, Vec::new(), true)
    }

    /// Pin an asset's type, surviving future imports, and republish.
    pub async fn set_asset_type(
        &self,
        name: &str,
        symbol: &str,
        asset_type: AssetType,
    ) -> Result<Arc<PortfolioSnapshot>> {
        let entry = self.entry(name)?;
        let generation = entry.generation.load(Ordering::SeqCst);
        let mut inner = entry.inner.lock().await;

        let symbol_uc = symbol.trim().to_uppercase();
        let mut touched = false;
        for (key, row) in inner.rows.iter_mut() {
            if key.symbol == symbol_uc {
                row.asset_type = asset_type;
                row.manual_type = true;
                touched = true;
            }
        }
        if !touched {
            return Err(anyhow!("no position for symbol '{symbol_uc}'"));
        }

        let cache = self.cache.lock().await;
        self.publish(&entry, &mut inner, &cache, generation, Vec::new(), true)
    }

    /// Rebuild the transaction ledger from the processed archive. Used after
    /// mapping or type repairs that change how history should be attributed.
    pub async fn rebuild_transactions(&self, name: &str) -> Result<Arc<PortfolioSnapshot>> {
        let entry = self.entry(name)?;
        let generation = entry.generation.load(Ordering::SeqCst);
        let mut inner = entry.inner.lock().await;

        let dir = entry
            .config
            .import_dir
            .as_ref()
            .ok_or_else(|| anyhow!("entry '{name}' has no import directory"))?;

        let mut ledger = TransactionLedger::new();
        let mut warnings = Vec::new();
        for file in scan_processed_transactions(dir)? {
            let label = file.file_label();
            let content = match file.read() {
                Ok(c) => c,
                Err(e) => {
                    warnings.push(Warning::parse(&label, 0, e.to_string()));
                    continue;
                }
            };
            let content = normalize_csv(&content, entry.config.format);
            let parsed = parse_transactions(&content, &label, &file.broker);
            warnings.extend(parsed.warnings);
            let (accepted, duplicates) = ledger.append_all(parsed.rows);
            debug!(file = %label, accepted, duplicates, "archive file replayed");
        }
        info!(entry = %entry_slug(name), transactions = ledger.len(), "ledger rebuilt");
        inner.ledger = ledger;

        let cache = self.cache.lock().await;
        self.publish(&entry, &mut inner, &cache, generation, warnings, true)
    }
}

/// Distinct canonical symbols for everything the entry currently tracks.
fn canonical_symbols(inner: &EntryInner) -> Vec<String> {
    let mut keys: HashSet<AssetKey> = inner.rows.keys().cloned().collect();
    for tx in inner.ledger.chronological() {
        keys.insert(AssetKey::new(&tx.broker, &tx.symbol));
    }

    let mut symbols: HashSet<String> = HashSet::new();
    for key in keys {
        let row = inner.rows.get(&key);
        let holds_position = row.map(|r| r.quantity > Decimal::ZERO).unwrap_or(true);
        if !holds_position {
            continue;
        }
        // Rows pre-flagged as unmapped only fetch through explicit overrides.
        let canonical = if row.map(|r| r.unmapped_hint).unwrap_or(false) {
            inner.mapper.map_override(&key.broker, &key.symbol)
        } else {
            inner.mapper.map(&key.broker, &key.symbol)
        };
        if let Some(canonical) = canonical {
            symbols.insert(canonical);
        }
    }

    let mut symbols: Vec<String> = symbols.into_iter().collect();
    symbols.sort();
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::quotes::StaticQuoteSource;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn fixed_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        ))
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn refresh_of_unknown_entry_fails() {
        let service = TrackerService::new(fixed_clock(), Arc::new(StaticQuoteSource::new()));
        assert!(service.refresh("nope").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_entry_is_rejected() {
        let service = TrackerService::new(fixed_clock(), Arc::new(StaticQuoteSource::new()));
        let config = EntryConfig::new("My Broker", BrokerType::Manual);
        service.add_entry(config.clone()).unwrap();
        assert!(service.add_entry(config).is_err());
    }

    #[tokio::test]
    async fn refresh_ingests_quotes_and_marks_processed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("brokerx.csv"),
            "symbol,name,type,quantity,avg_buy_price,currency\n\
             AAPL,Apple,equity,10,150,USD\n",
        )
        .unwrap();

        let source = Arc::new(StaticQuoteSource::new());
        source.set_quote(
            "AAPL",
            d("155"),
            "USD",
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        );

        let service = TrackerService::new(fixed_clock(), source);
        service
            .add_entry(
                EntryConfig::new("My Broker", BrokerType::Csv).with_import_dir(dir.path()),
            )
            .unwrap();

        let snapshot = service.refresh("My Broker").await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert!(snapshot.broker.connected);
        let asset = snapshot.asset("brokerx", "AAPL").unwrap();
        assert_eq!(asset.market_value, Some(d("1550")));
        assert_eq!(snapshot.totals.total_profit_loss, d("50"));

        // The import is archived, so the next cycle re-ingests nothing.
        assert!(!dir.path().join("brokerx.csv").exists());
        let again = service.refresh("My Broker").await.unwrap();
        assert_eq!(again.version, 2);
        assert_eq!(again.asset("brokerx", "AAPL").unwrap().quantity, d("10"));
    }

    #[tokio::test]
    async fn fetch_failure_keeps_stale_quote_and_flags_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.csv"),
            "symbol,quantity,avg_buy_price\nAAPL,10,150\n",
        )
        .unwrap();

        let source = Arc::new(StaticQuoteSource::new());
        source.set_quote(
            "AAPL",
            d("155"),
            "USD",
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        );
        let service = TrackerService::new(fixed_clock(), source.clone());
        service
            .add_entry(EntryConfig::new("b", BrokerType::Csv).with_import_dir(dir.path()))
            .unwrap();
        service.refresh("b").await.unwrap();

        source.set_failing("AAPL", true);
        let snapshot = service.refresh("b").await.unwrap();
        assert!(!snapshot.broker.connected);
        // Last known price is still served.
        let asset = snapshot.asset("b", "AAPL").unwrap();
        assert_eq!(asset.current_price, Some(d("155")));
        assert!(snapshot
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::FetchFailure { .. })));
    }

    #[tokio::test]
    async fn removed_entry_stops_serving_snapshots() {
        let service = TrackerService::new(fixed_clock(), Arc::new(StaticQuoteSource::new()));
        service
            .add_entry(EntryConfig::new("gone", BrokerType::Manual))
            .unwrap();
        assert!(service.snapshot("gone").is_some());
        assert!(service.remove_entry("gone"));
        assert!(service.snapshot("gone").is_none());
        assert!(!service.remove_entry("gone"));
    }

    #[tokio::test]
    async fn remap_unlocks_quotes_for_a_previously_unmapped_symbol() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.csv"),
            "symbol,quantity,avg_buy_price\nWEIRDLONGFUND,5,20\n",
        )
        .unwrap();

        let source = Arc::new(StaticQuoteSource::new());
        source.set_quote(
            "FUND.DE",
            d("25"),
            "EUR",
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        );
        let service = TrackerService::new(fixed_clock(), source);
        service
            .add_entry(EntryConfig::new("b", BrokerType::Csv).with_import_dir(dir.path()))
            .unwrap();

        let snapshot = service.refresh("b").await.unwrap();
        assert_eq!(snapshot.unmapped_symbols, vec!["WEIRDLONGFUND"]);

        service.remap_symbol("b", "WEIRDLONGFUND", "FUND.DE").await.unwrap();
        let snapshot = service.refresh("b").await.unwrap();
        assert!(snapshot.unmapped_symbols.is_empty());
        let asset = snapshot.asset("b", "WEIRDLONGFUND").unwrap();
        assert_eq!(asset.current_price, Some(d("25")));
    }

    #[tokio::test]
    async fn failed_cycle_republishes_the_last_snapshot_as_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let imports = dir.path().join("imports");
        std::fs::create_dir(&imports).unwrap();
        std::fs::write(
            imports.join("b.csv"),
            "symbol,quantity,avg_buy_price\nAAPL,10,150\n",
        )
        .unwrap();

        let source = Arc::new(StaticQuoteSource::new());
        source.set_quote(
            "AAPL",
            d("155"),
            "USD",
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        );
        let service = TrackerService::new(fixed_clock(), source);
        service
            .add_entry(EntryConfig::new("b", BrokerType::Csv).with_import_dir(imports.clone()))
            .unwrap();
        let good = service.refresh("b").await.unwrap();
        assert!(good.broker.connected);

        // The import directory disappears out from under the entry.
        std::fs::remove_dir_all(&imports).unwrap();
        std::fs::write(&imports, "not a directory").unwrap();
        assert!(service.refresh("b").await.is_err());

        let snapshot = service.snapshot("b").unwrap();
        assert!(!snapshot.broker.connected);
        // The last good data is still served.
        assert_eq!(snapshot.asset("b", "AAPL").unwrap().quantity, d("10"));
        assert_eq!(snapshot.version, good.version);
    }

    /// Source that parks every fetch until the test lets it through.
    struct GatedQuoteSource {
        entered: tokio::sync::Semaphore,
        release: tokio::sync::Semaphore,
    }

    impl GatedQuoteSource {
        fn new() -> Self {
            Self {
                entered: tokio::sync::Semaphore::new(0),
                release: tokio::sync::Semaphore::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl crate::quotes::QuoteSource for GatedQuoteSource {
        async fn fetch(&self, _symbol: &str) -> Result<crate::quotes::Quote> {
            self.entered.add_permits(1);
            self.release.acquire().await.expect("gate closed").forget();
            Err(anyhow!("feed unavailable"))
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn removal_discards_an_in_flight_refresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.csv"),
            "symbol,quantity,avg_buy_price\nAAPL,10,150\n",
        )
        .unwrap();

        let gate = Arc::new(GatedQuoteSource::new());
        let service = Arc::new(TrackerService::new(fixed_clock(), gate.clone()));
        service
            .add_entry(EntryConfig::new("b", BrokerType::Csv).with_import_dir(dir.path()))
            .unwrap();
        service
            .add_entry(EntryConfig::new("other", BrokerType::Manual))
            .unwrap();

        let task = tokio::spawn({
            let service = service.clone();
            async move { service.refresh("b").await }
        });
        gate.entered.acquire().await.unwrap().forget();
        assert!(service.remove_entry("b"));
        gate.release.add_permits(1);

        let result = task.await.unwrap();
        assert!(result.unwrap_err().to_string().contains("removed"));
        assert!(service.snapshot("b").is_none());
        // The cycle published nothing: the import was never archived and the
        // other entry is untouched.
        assert!(dir.path().join("b.csv").exists());
        assert!(service.snapshot("other").is_some());
        assert!(service.refresh("other").await.is_ok());
    }
}
