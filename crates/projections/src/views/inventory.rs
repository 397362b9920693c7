//! Inventory read model of committed quantities for every product.

use common::{ProductId, StorageId};
use domain::{InventoryError, Result};
use futures_util::future::try_join_all;
use store::{ItemStore, Product, ProductStore, Storage, StorageStore};

/// A product with its committed quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuantity {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u64,
}

/// A storage together with all of its products.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageWithProducts {
    pub storage: Storage,
    pub products: Vec<ProductQuantity>,
}

/// Read model over committed stock.
///
/// Pending changes are not included; see
/// [`QuantityProjector`](crate::QuantityProjector) for those.
pub struct InventoryView<S, P, I>
where
    S: StorageStore,
    P: ProductStore,
    I: ItemStore,
{
    storages: S,
    products: P,
    items: I,
}

impl<S, P, I> InventoryView<S, P, I>
where
    S: StorageStore,
    P: ProductStore,
    I: ItemStore,
{
    /// Creates a new inventory view over the given stores.
    pub fn new(storages: S, products: P, items: I) -> Self {
        Self {
            storages,
            products,
            items,
        }
    }

    /// Gets every product of a storage with its committed quantity.
    pub async fn storage_products(&self, storage_id: StorageId) -> Result<Vec<ProductQuantity>> {
        if self.storages.find_by_id(storage_id).await?.is_none() {
            return Err(InventoryError::StorageNotFound(storage_id));
        }
        self.products_of(storage_id).await
    }

    /// Gets all storages, each with its products.
    #[tracing::instrument(skip(self))]
    pub async fn storages_with_products(&self) -> Result<Vec<StorageWithProducts>> {
        let storages = self.storages.find_all().await?;
        let mut result = Vec::with_capacity(storages.len());
        for storage in storages {
            let products = self.products_of(storage.id).await?;
            result.push(StorageWithProducts { storage, products });
        }
        Ok(result)
    }

    async fn products_of(&self, storage_id: StorageId) -> Result<Vec<ProductQuantity>> {
        let products = self.products.find_all_by_storage(storage_id).await?;
        try_join_all(products.into_iter().map(|p| self.with_quantity(p))).await
    }

    async fn with_quantity(&self, product: Product) -> Result<ProductQuantity> {
        let quantity = self.items.count_by_product(product.id).await?;
        Ok(ProductQuantity {
            product_id: product.id,
            name: product.name,
            quantity,
        })
    }
}
