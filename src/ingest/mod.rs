//! CSV ingestion: broker-format preprocessing, row parsing, and the
//! import-directory scan/mark-processed protocol.

mod files;
mod format;
mod rows;

pub use files::{
    scan_import_dir, scan_processed_transactions, ImportBatch, ImportFile, ImportKind,
    MarkProcessed,
};
pub use format::{normalize_csv, BrokerFormat};
pub use rows::{parse_positions, parse_transactions, ParsedRows, PositionRow};
