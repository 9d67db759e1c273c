mod asset;
mod broker;
mod transaction;

pub use asset::{Asset, AssetKey, AssetType};
pub use broker::{BrokerEntry, BrokerType};
pub use transaction::{Transaction, TransactionKey};
