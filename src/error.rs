//! Failure taxonomy for the ingestion/reconciliation pipeline.
//!
//! Row- and symbol-scoped problems are values (`Warning`), carried in results
//! and logged; they never abort a batch. Only entry-fatal conditions surface
//! as `TrackerError`.

use serde::{Deserialize, Serialize};

/// Entry-fatal errors. A failed entry refresh leaves the last good snapshot
/// in place; these abort only the failing entry's cycle.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// No usable broker identity or required configuration entirely absent.
    /// Surfaced to the host layer as a setup-time problem.
    #[error("configuration error: {0}")]
    FatalConfiguration(String),

    /// No row of any input could be parsed for this entry.
    #[error("ingestion failed for entry '{entry}': {reason}")]
    Ingest { entry: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A recoverable, row- or symbol-scoped problem. Accumulated into refresh
/// results so callers can surface them without interrupting processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// One row was rejected; ingestion of the rest of the file continued.
    ParseFailure {
        file: String,
        line: u64,
        reason: String,
    },
    /// A broker symbol could not be resolved to a canonical symbol.
    /// The asset is tracked by quantity/cost basis only.
    MappingFailure { broker: String, symbol: String },
    /// A quote fetch failed; the cached value is retained and marked stale.
    FetchFailure { symbol: String, reason: String },
    /// A sell exceeded the held quantity (clamped) or transactions were
    /// malformed; processing continued with clamped values.
    LedgerIntegrity {
        broker: String,
        symbol: String,
        detail: String,
    },
}

impl Warning {
    pub fn parse(file: impl Into<String>, line: u64, reason: impl Into<String>) -> Self {
        Warning::ParseFailure {
            file: file.into(),
            line,
            reason: reason.into(),
        }
    }

    pub fn mapping(broker: impl Into<String>, symbol: impl Into<String>) -> Self {
        Warning::MappingFailure {
            broker: broker.into(),
            symbol: symbol.into(),
        }
    }

    pub fn fetch(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Warning::FetchFailure {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    pub fn ledger(
        broker: impl Into<String>,
        symbol: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Warning::LedgerIntegrity {
            broker: broker.into(),
            symbol: symbol.into(),
            detail: detail.into(),
        }
    }

    /// Emit this warning through `tracing` with structured fields.
    pub fn log(&self) {
        match self {
            Warning::ParseFailure { file, line, reason } => {
                tracing::warn!(file = %file, line, reason = %reason, "row rejected");
            }
            Warning::MappingFailure { broker, symbol } => {
                tracing::warn!(broker = %broker, symbol = %symbol, "symbol unmapped");
            }
            Warning::FetchFailure { symbol, reason } => {
                tracing::warn!(symbol = %symbol, reason = %reason, "quote fetch failed");
            }
            Warning::LedgerIntegrity {
                broker,
                symbol,
                detail,
            } => {
                tracing::warn!(broker = %broker, symbol = %symbol, detail = %detail, "ledger integrity");
            }
        }
    }
}
