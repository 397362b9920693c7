//! Errors surfaced by the inventory services.

use common::{ProductId, StorageId};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur while changing or committing quantities.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// A desired or initial quantity was negative.
    #[error("Invalid quantity: {quantity} (must not be negative)")]
    InvalidQuantity { quantity: i64 },

    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The storage does not exist.
    #[error("Storage not found: {0}")]
    StorageNotFound(StorageId),

    /// Another writer kept changing the product's pending transaction.
    #[error("Concurrency conflict on product {product_id} after {attempts} attempts")]
    ConcurrencyConflict {
        product_id: ProductId,
        attempts: u32,
    },

    /// Some transactions of a commit could not be applied.
    /// They remain pending and the commit can be retried.
    #[error(
        "Commit of storage {storage_id} incomplete: {failed} of {total} transactions failed: {source}"
    )]
    CommitIncomplete {
        storage_id: StorageId,
        failed: usize,
        total: usize,
        #[source]
        source: Box<InventoryError>,
    },

    /// The underlying store failed.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl InventoryError {
    /// Returns true if repeating the operation may succeed without any
    /// change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InventoryError::ConcurrencyConflict { .. }
                | InventoryError::CommitIncomplete { .. }
                | InventoryError::Persistence(_)
        )
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
