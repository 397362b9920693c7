//! Shared identifier types for the storage reconciliation workspace.

mod types;

pub use types::{ItemId, ProductId, StorageId, TransactionId};
