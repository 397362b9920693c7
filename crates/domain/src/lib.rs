//! Domain layer for storage quantity reconciliation.
//!
//! This crate provides the command side of the system:
//! - `TransactionLedger` for recording desired quantities as pending changes
//! - `CatalogService` for storage and product lifecycle
//! - `KeyedLocks` for per-key serialization of writers
//! - `InventoryError`, shared by every service crate

pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod locks;

pub use catalog::CatalogService;
pub use config::LedgerConfig;
pub use error::{InventoryError, Result};
pub use ledger::{LedgerWrite, ProjectedQuantity, TransactionLedger};
pub use locks::KeyedLocks;
