use common::ItemId;
use thiserror::Error;

/// Errors that can occur when interacting with a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The item to delete does not exist (already removed by someone else).
    #[error("Item not found: {0}")]
    ItemMissing(ItemId),

    /// A record was modified since it was read.
    /// The expected revision did not match the stored one.
    #[error(
        "Concurrency conflict for {entity} {id}: expected revision {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    /// Saving would create a second pending transaction for the product.
    #[error("Product {product_id} already has a pending transaction")]
    DuplicatePending { product_id: String },

    /// A stored document could not be decoded into its record type.
    #[error("Malformed {collection} record {key}: {source}")]
    Malformed {
        collection: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded for storage.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend failed for a reason opaque to the caller.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if the error is a revision or uniqueness conflict that a
    /// caller may resolve by re-reading and retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrencyConflict { .. } | StoreError::DuplicatePending { .. }
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
