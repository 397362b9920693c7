//! Storage and product lifecycle.

use std::sync::Arc;

use common::{ProductId, StorageId};
use store::{ItemStore, Product, ProductStore, Storage, StorageStore, TransactionStore};

use crate::error::{InventoryError, Result};
use crate::ledger::{ProjectedQuantity, TransactionLedger};

/// Service for creating and removing storages and products.
///
/// Initial product quantities go through the ledger like any other change,
/// so a new product starts with a pending transaction and no items.
pub struct CatalogService<S, P, I, T>
where
    S: StorageStore,
    P: ProductStore,
    I: ItemStore,
    T: TransactionStore,
{
    storages: S,
    ledger: Arc<TransactionLedger<P, I, T>>,
}

impl<S, P, I, T> CatalogService<S, P, I, T>
where
    S: StorageStore,
    P: ProductStore,
    I: ItemStore,
    T: TransactionStore,
{
    /// Creates a new catalog service sharing the given ledger.
    pub fn new(storages: S, ledger: Arc<TransactionLedger<P, I, T>>) -> Self {
        Self { storages, ledger }
    }

    /// Returns the ledger used for quantity changes.
    pub fn ledger(&self) -> &Arc<TransactionLedger<P, I, T>> {
        &self.ledger
    }

    /// Creates a new storage.
    #[tracing::instrument(skip(self))]
    pub async fn create_storage(&self, name: &str) -> Result<Storage> {
        let storage = self.storages.save(Storage::new(name)).await?;
        tracing::info!(storage_id = %storage.id, "storage created");
        Ok(storage)
    }

    /// Returns all storages.
    pub async fn list_storages(&self) -> Result<Vec<Storage>> {
        Ok(self.storages.find_all().await?)
    }

    /// Loads a storage, failing if it does not exist.
    pub async fn get_storage(&self, storage_id: StorageId) -> Result<Storage> {
        self.storages
            .find_by_id(storage_id)
            .await?
            .ok_or(InventoryError::StorageNotFound(storage_id))
    }

    /// Removes a storage.
    #[tracing::instrument(skip(self))]
    pub async fn remove_storage(&self, storage_id: StorageId) -> Result<()> {
        self.get_storage(storage_id).await?;
        self.storages.delete(storage_id).await?;
        tracing::info!(%storage_id, "storage removed");
        Ok(())
    }

    /// Creates a product in a storage and records its initial quantity as a
    /// pending change.
    #[tracing::instrument(skip(self))]
    pub async fn create_product(
        &self,
        storage_id: StorageId,
        name: &str,
        initial_quantity: i64,
    ) -> Result<ProjectedQuantity> {
        if initial_quantity < 0 {
            return Err(InventoryError::InvalidQuantity {
                quantity: initial_quantity,
            });
        }
        self.get_storage(storage_id).await?;

        let product = self
            .ledger
            .products()
            .save(Product::new(storage_id, name))
            .await?;
        tracing::info!(product_id = %product.id, %storage_id, "product created");

        self.ledger
            .set_desired_quantity(product.id, initial_quantity)
            .await
    }

    /// Loads a product.
    pub async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.ledger.products().find_by_id(product_id).await?)
    }

    /// Removes a product and discards its pending change.
    ///
    /// Removing a product that does not exist succeeds without effect.
    #[tracing::instrument(skip(self))]
    pub async fn remove_product(&self, product_id: ProductId) -> Result<()> {
        if self.ledger.remove_product(product_id).await? {
            tracing::info!(%product_id, "product removed");
        }
        Ok(())
    }
}
