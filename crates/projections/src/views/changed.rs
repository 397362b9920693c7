//! Changed-products view previewing pending quantities per storage.

use common::{ProductId, StorageId};
use domain::{InventoryError, Result};
use futures_util::future::try_join_all;
use store::{ItemStore, ProductStore, StorageStore, Transaction, TransactionStore};

/// A product with a pending change, as it would look after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedProduct {
    pub product_id: ProductId,
    pub name: String,
    /// Count of item records.
    pub committed: u64,
    /// Items the next commit creates (positive) or deletes (negative).
    pub quantity_change: i64,
    /// The quantity the next commit reconciles to.
    pub projected: u64,
}

/// Read-only projection of quantities including not-yet-committed changes.
///
/// Never writes. Reads taken while a commit is running may show some
/// products already applied and others still pending.
pub struct QuantityProjector<S, P, I, T>
where
    S: StorageStore,
    P: ProductStore,
    I: ItemStore,
    T: TransactionStore,
{
    storages: S,
    products: P,
    items: I,
    transactions: T,
}

impl<S, P, I, T> QuantityProjector<S, P, I, T>
where
    S: StorageStore,
    P: ProductStore,
    I: ItemStore,
    T: TransactionStore,
{
    /// Creates a new projector over the given stores.
    pub fn new(storages: S, products: P, items: I, transactions: T) -> Self {
        Self {
            storages,
            products,
            items,
            transactions,
        }
    }

    /// Lists the products of a storage that have a pending change, with
    /// their projected quantity.
    ///
    /// Products without a pending change are omitted. Entries are ordered
    /// by transaction creation time.
    #[tracing::instrument(skip(self))]
    pub async fn get_changed_view(&self, storage_id: StorageId) -> Result<Vec<ChangedProduct>> {
        if self.storages.find_by_id(storage_id).await?.is_none() {
            return Err(InventoryError::StorageNotFound(storage_id));
        }

        let pending = self
            .transactions
            .find_all_pending_by_storage(storage_id)
            .await?;

        let changed = try_join_all(pending.iter().map(|tx| self.project(tx))).await?;
        let changed: Vec<_> = changed.into_iter().flatten().collect();

        metrics::counter!("projections_changed_view_reads_total").increment(1);
        tracing::debug!(%storage_id, changed = changed.len(), "changed view built");

        Ok(changed)
    }

    /// Returns the projected quantity of a single product.
    pub async fn projected_quantity(&self, product_id: ProductId) -> Result<u64> {
        if self.products.find_by_id(product_id).await?.is_none() {
            return Err(InventoryError::ProductNotFound(product_id));
        }
        match self.transactions.find_pending_by_product(product_id).await? {
            Some(tx) => Ok(tx.target_quantity()),
            None => Ok(self.items.count_by_product(product_id).await?),
        }
    }

    /// Pairs a pending transaction with its product's committed count.
    ///
    /// The projection is the transaction's target, which is also what a
    /// commit converges to after an earlier commit stopped halfway. Returns
    /// None when the product was removed after the change was recorded.
    async fn project(&self, tx: &Transaction) -> Result<Option<ChangedProduct>> {
        let Some(product) = self.products.find_by_id(tx.product_id).await? else {
            tracing::debug!(product_id = %tx.product_id, "skipping change of removed product");
            return Ok(None);
        };
        let committed = self.items.count_by_product(product.id).await?;
        let projected = tx.target_quantity();

        Ok(Some(ChangedProduct {
            product_id: product.id,
            name: product.name,
            committed,
            quantity_change: projected as i64 - committed as i64,
            projected,
        }))
    }
}
