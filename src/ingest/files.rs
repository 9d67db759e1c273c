//! Import-directory protocol.
//!
//! A broker entry's import directory receives raw CSV drops. Files named
//! `{broker}_transactions.csv` are transaction logs; every other `*.csv` is a
//! position export whose stem (spaces removed) becomes the default broker
//! label. Once — and only once — a file's data has been incorporated into a
//! successful reconciliation, the file is renamed to
//! `{name}.processed.{unix_ts}` so it is never re-ingested.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

const TRANSACTIONS_SUFFIX: &str = "_transactions";
const PROCESSED_MARKER: &str = ".processed.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    Positions,
    Transactions,
}

/// One CSV awaiting ingestion.
#[derive(Debug, Clone)]
pub struct ImportFile {
    pub path: PathBuf,
    pub kind: ImportKind,
    /// Broker label derived from the file name.
    pub broker: String,
}

impl ImportFile {
    pub fn file_label(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))
    }
}

/// The pending work found in one directory scan.
#[derive(Debug, Default)]
pub struct ImportBatch {
    pub positions: Vec<ImportFile>,
    pub transactions: Vec<ImportFile>,
}

impl ImportBatch {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.transactions.is_empty()
    }

    pub fn all_files(&self) -> impl Iterator<Item = &ImportFile> {
        self.positions.iter().chain(self.transactions.iter())
    }
}

fn classify(path: &Path) -> Option<ImportFile> {
    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if let Some(broker) = stem.strip_suffix(TRANSACTIONS_SUFFIX) {
        Some(ImportFile {
            path: path.to_path_buf(),
            kind: ImportKind::Transactions,
            broker: broker.replace(' ', "").to_lowercase(),
        })
    } else {
        Some(ImportFile {
            path: path.to_path_buf(),
            kind: ImportKind::Positions,
            broker: stem.replace(' ', "").to_lowercase(),
        })
    }
}

/// Scan a directory for unprocessed CSV drops, sorted by file name so runs
/// are deterministic.
pub fn scan_import_dir(dir: &Path) -> Result<ImportBatch> {
    let mut batch = ImportBatch::default();
    if !dir.exists() {
        return Ok(batch);
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read import directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let Some(file) = classify(&path) else {
            continue;
        };
        debug!(file = %file.file_label(), kind = ?file.kind, broker = %file.broker, "import candidate");
        match file.kind {
            ImportKind::Positions => batch.positions.push(file),
            ImportKind::Transactions => batch.transactions.push(file),
        }
    }
    Ok(batch)
}

/// List the processed transaction archive for a directory, oldest first.
/// Used by `rebuild_transactions` to replay history into a fresh ledger.
pub fn scan_processed_transactions(dir: &Path) -> Result<Vec<ImportFile>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read import directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((stem, _ts)) = name.split_once(PROCESSED_MARKER) else {
            continue;
        };
        let Some(stem) = stem.strip_suffix(".csv") else {
            continue;
        };
        let Some(broker) = stem.strip_suffix(TRANSACTIONS_SUFFIX) else {
            continue;
        };
        out.push(ImportFile {
            path: path.clone(),
            kind: ImportKind::Transactions,
            broker: broker.replace(' ', "").to_lowercase(),
        });
    }
    Ok(out)
}

/// Rename a fully-incorporated import so it will not be picked up again.
#[derive(Debug)]
pub struct MarkProcessed;

impl MarkProcessed {
    pub fn rename(file: &ImportFile, unix_ts: i64) -> Result<PathBuf> {
        let name = file.file_label();
        let target = file
            .path
            .with_file_name(format!("{name}{PROCESSED_MARKER}{unix_ts}"));
        std::fs::rename(&file.path, &target)
            .with_context(|| format!("failed to mark {} processed", file.path.display()))?;
        Ok(target)
    }
}
