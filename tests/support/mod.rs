#![allow(dead_code)]

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use invtrack::clock::SteppingClock;
use invtrack::config::EntryConfig;
use invtrack::models::BrokerType;
use invtrack::quotes::StaticQuoteSource;
use invtrack::service::TrackerService;

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

/// One CSV-import entry wired to a scripted quote source and a steppable
/// clock, backed by a temporary import directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub clock: Arc<SteppingClock>,
    pub source: Arc<StaticQuoteSource>,
    pub service: TrackerService,
}

pub fn harness(entry_name: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(SteppingClock::new(start_time()));
    let source = Arc::new(StaticQuoteSource::new());
    let service = TrackerService::new(clock.clone(), source.clone());
    service
        .add_entry(EntryConfig::new(entry_name, BrokerType::Csv).with_import_dir(dir.path()))
        .unwrap();
    Harness {
        dir,
        clock,
        source,
        service,
    }
}

pub fn write_csv(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

pub fn dir_file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}
