pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod mapping;
pub mod models;
pub mod portfolio;
pub mod quotes;
pub mod reconcile;
pub mod refresh;
pub mod service;
pub mod snapshot;
