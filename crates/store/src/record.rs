use chrono::{DateTime, Utc};
use common::{ItemId, ProductId, StorageId, TransactionId};
use serde::{Deserialize, Serialize};

/// A named storage location holding products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    pub id: StorageId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    /// Creates a new storage with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: StorageId::new(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A product tracked inside a storage.
///
/// The product itself carries no quantity; its committed quantity is the
/// number of [`Item`] records referencing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub storage_id: StorageId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Creates a new product in the given storage.
    pub fn new(storage_id: StorageId, name: impl Into<String>) -> Self {
        Self {
            id: ProductId::new(),
            storage_id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// One physical unit of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub product_id: ProductId,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Creates a new item for the given product.
    pub fn new(product_id: ProductId) -> Self {
        Self {
            id: ItemId::new(),
            product_id,
            created_at: Utc::now(),
        }
    }

    /// Sort key for the oldest-first ordering used by item listings.
    pub fn age_key(&self) -> (DateTime<Utc>, ItemId) {
        (self.created_at, self.id)
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Recorded intent, not yet materialized into items.
    #[default]
    Pending,
    /// Materialized by a commit; no further meaning.
    Applied,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Pending => write!(f, "pending"),
            TransactionState::Applied => write!(f, "applied"),
        }
    }
}

/// A recorded change to a product's quantity.
///
/// `baseline_quantity` is the committed count observed when
/// `quantity_change` was last written, so the absolute target survives a
/// partially applied commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub storage_id: StorageId,
    pub product_id: ProductId,
    pub quantity_change: i64,
    pub baseline_quantity: u64,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency counter. Zero until first saved.
    #[serde(default)]
    pub revision: u64,
}

impl Transaction {
    /// Creates a new, unsaved pending transaction.
    pub fn pending(
        storage_id: StorageId,
        product_id: ProductId,
        baseline_quantity: u64,
        quantity_change: i64,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            storage_id,
            product_id,
            quantity_change,
            baseline_quantity,
            state: TransactionState::Pending,
            created_at: Utc::now(),
            revision: 0,
        }
    }

    /// Returns true while the transaction awaits a commit.
    pub fn is_pending(&self) -> bool {
        self.state == TransactionState::Pending
    }

    /// The absolute quantity this transaction reconciles towards.
    pub fn target_quantity(&self) -> u64 {
        let target = self.baseline_quantity as i64 + self.quantity_change;
        target.max(0) as u64
    }

    /// Overwrites the recorded change against a fresh committed count.
    pub fn rebase(&mut self, baseline_quantity: u64, quantity_change: i64) {
        self.baseline_quantity = baseline_quantity;
        self.quantity_change = quantity_change;
    }

    /// Marks the transaction as applied.
    pub fn mark_applied(&mut self) {
        self.state = TransactionState::Applied;
    }
}
