use async_trait::async_trait;
use common::{ItemId, ProductId, StorageId};

use crate::{Item, Product, Result, Storage, StoreError, Transaction};

/// Persistence of storage locations.
#[async_trait]
pub trait StorageStore: Send + Sync {
    /// Finds a storage by id.
    async fn find_by_id(&self, id: StorageId) -> Result<Option<Storage>>;

    /// Returns all storages, oldest first.
    async fn find_all(&self) -> Result<Vec<Storage>>;

    /// Inserts or replaces a storage.
    async fn save(&self, storage: Storage) -> Result<Storage>;

    /// Removes a storage. Removing a missing storage is not an error.
    async fn delete(&self, id: StorageId) -> Result<()>;
}

/// Persistence of products.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Finds a product by id.
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>>;

    /// Returns all products of a storage, oldest first.
    async fn find_all_by_storage(&self, storage_id: StorageId) -> Result<Vec<Product>>;

    /// Inserts or replaces a product.
    async fn save(&self, product: Product) -> Result<Product>;

    /// Removes a product. Removing a missing product is not an error.
    async fn delete(&self, id: ProductId) -> Result<()>;
}

/// Persistence of individual items.
///
/// The committed quantity of a product is the number of items referencing it.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Creates and persists a new item for the product.
    async fn create(&self, product_id: ProductId) -> Result<Item>;

    /// Deletes an item.
    ///
    /// Fails with [`StoreError::ItemMissing`] if the item does not exist.
    async fn delete(&self, item_id: ItemId) -> Result<()>;

    /// Lists the items of a product, oldest first.
    ///
    /// Ordering is by `created_at` ascending, ties broken by item id, and
    /// must not depend on backend iteration order.
    async fn list_by_product(&self, product_id: ProductId) -> Result<Vec<Item>>;

    /// Returns the committed quantity of a product.
    async fn count_by_product(&self, product_id: ProductId) -> Result<u64> {
        Ok(self.list_by_product(product_id).await?.len() as u64)
    }
}

/// Persistence of quantity-change transactions.
///
/// Implementations keep a keyed index from product to its pending
/// transaction, so at most one pending transaction exists per product.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Returns the pending transaction of a product, if any.
    async fn find_pending_by_product(&self, product_id: ProductId)
    -> Result<Option<Transaction>>;

    /// Returns all pending transactions of a storage, oldest first, ties
    /// broken by product id.
    async fn find_all_pending_by_storage(&self, storage_id: StorageId) -> Result<Vec<Transaction>>;

    /// Inserts or updates a transaction.
    ///
    /// `transaction.revision` must equal the stored revision (zero for a
    /// new record), otherwise [`StoreError::ConcurrencyConflict`] is
    /// returned. Inserting a pending transaction for a product that already
    /// has one fails with [`StoreError::DuplicatePending`].
    ///
    /// Returns the stored transaction with its new revision.
    async fn save(&self, transaction: Transaction) -> Result<Transaction>;

    /// Deletes a transaction, checking its revision like [`save`](Self::save).
    async fn delete(&self, transaction: &Transaction) -> Result<()>;

    /// Removes applied transactions of a storage. Returns how many were removed.
    async fn prune_applied(&self, storage_id: StorageId) -> Result<usize>;
}

/// Checks an optimistic revision against the stored one.
pub(crate) fn check_revision(
    entity: &'static str,
    id: impl std::fmt::Display,
    expected: u64,
    actual: u64,
) -> Result<()> {
    if expected != actual {
        return Err(StoreError::ConcurrencyConflict {
            entity,
            id: id.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Sorts items into the oldest-first order required by [`ItemStore`].
pub(crate) fn sort_oldest_first(items: &mut [Item]) {
    items.sort_by_key(Item::age_key);
}
