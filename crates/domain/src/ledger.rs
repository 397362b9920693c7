//! Pending transaction ledger.
//!
//! Turns "set the quantity of this product to N" into at most one pending
//! transaction per product, written in place until a commit applies it.

use common::{ProductId, StorageId};
use store::{ItemStore, Product, ProductStore, Transaction, TransactionStore};
use tokio::sync::OwnedMutexGuard;

use crate::config::LedgerConfig;
use crate::error::{InventoryError, Result};
use crate::locks::KeyedLocks;

/// The write a ledger call performed on the transaction store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    /// A new pending transaction was created.
    Created,
    /// The existing pending transaction was overwritten with a new delta.
    Updated,
    /// The pending transaction was deleted because the desired quantity
    /// equals the committed one again.
    Discarded,
    /// Nothing was pending and nothing changed.
    Unchanged,
}

impl LedgerWrite {
    fn as_str(self) -> &'static str {
        match self {
            LedgerWrite::Created => "created",
            LedgerWrite::Updated => "updated",
            LedgerWrite::Discarded => "discarded",
            LedgerWrite::Unchanged => "unchanged",
        }
    }
}

/// Quantity of a product as seen after a ledger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedQuantity {
    pub product_id: ProductId,
    pub storage_id: StorageId,
    /// Count of item records.
    pub committed: u64,
    /// Committed count plus the pending delta.
    pub projected: u64,
    pub write: LedgerWrite,
}

impl ProjectedQuantity {
    /// The pending change, zero when nothing is pending.
    pub fn delta(&self) -> i64 {
        self.projected as i64 - self.committed as i64
    }
}

/// Owns the rule that a product has at most one pending transaction.
///
/// Calls for the same product are serialized by a per-product lock. The
/// commit step takes the same lock through [`lock_product`](Self::lock_product)
/// while it materializes a product, so a desired quantity recorded during a
/// commit is written after that product is applied. The revision check of the
/// transaction store covers writers outside this ledger, and lost checks are
/// retried against a fresh read.
pub struct TransactionLedger<P, I, T>
where
    P: ProductStore,
    I: ItemStore,
    T: TransactionStore,
{
    products: P,
    items: I,
    transactions: T,
    locks: KeyedLocks<ProductId>,
    config: LedgerConfig,
}

impl<P, I, T> TransactionLedger<P, I, T>
where
    P: ProductStore,
    I: ItemStore,
    T: TransactionStore,
{
    /// Creates a ledger with default configuration.
    pub fn new(products: P, items: I, transactions: T) -> Self {
        Self::with_config(products, items, transactions, LedgerConfig::default())
    }

    /// Creates a ledger with explicit configuration.
    pub fn with_config(products: P, items: I, transactions: T, config: LedgerConfig) -> Self {
        Self {
            products,
            items,
            transactions,
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Returns a reference to the product store.
    pub fn products(&self) -> &P {
        &self.products
    }

    /// Returns a reference to the item store.
    pub fn items(&self) -> &I {
        &self.items
    }

    /// Returns a reference to the transaction store.
    pub fn transactions(&self) -> &T {
        &self.transactions
    }

    /// Takes the write lock of a product.
    ///
    /// Ledger calls for the product wait until the guard is dropped.
    pub async fn lock_product(&self, product_id: ProductId) -> OwnedMutexGuard<()> {
        self.locks.acquire(product_id).await
    }

    /// Records that the product should end up with `desired` items.
    ///
    /// Creates, overwrites, or deletes the product's pending transaction so
    /// that its delta equals `desired − committed`. Deltas never accumulate:
    /// the last call wins.
    #[tracing::instrument(skip(self))]
    pub async fn set_desired_quantity(
        &self,
        product_id: ProductId,
        desired: i64,
    ) -> Result<ProjectedQuantity> {
        if desired < 0 {
            return Err(InventoryError::InvalidQuantity { quantity: desired });
        }
        let desired = desired as u64;

        let _guard = self.locks.acquire(product_id).await;

        let product = self
            .products
            .find_by_id(product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound(product_id))?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.write_pending(&product, desired).await {
                Err(InventoryError::Persistence(e)) if e.is_conflict() => {
                    metrics::counter!("ledger_conflicts_total").increment(1);
                    if attempts > self.config.max_conflict_retries {
                        return Err(InventoryError::ConcurrencyConflict {
                            product_id,
                            attempts,
                        });
                    }
                    tracing::warn!(
                        %product_id,
                        attempts,
                        error = %e,
                        "pending transaction changed concurrently, retrying"
                    );
                }
                result => return result,
            }
        }
    }

    /// Returns the pending transaction of a product, if any.
    pub async fn pending_for(&self, product_id: ProductId) -> Result<Option<Transaction>> {
        Ok(self.transactions.find_pending_by_product(product_id).await?)
    }

    /// Deletes the pending transaction of a product, if any.
    ///
    /// Returns true if a transaction was discarded.
    #[tracing::instrument(skip(self))]
    pub async fn discard_pending(&self, product_id: ProductId) -> Result<bool> {
        let _guard = self.locks.acquire(product_id).await;
        self.discard_locked(product_id).await
    }

    /// Deletes a product together with its pending transaction.
    ///
    /// Both writes happen under the product lock, so no pending change can be
    /// recorded for the product in between. Returns false if the product did
    /// not exist.
    #[tracing::instrument(skip(self))]
    pub async fn remove_product(&self, product_id: ProductId) -> Result<bool> {
        let _guard = self.locks.acquire(product_id).await;
        if self.products.find_by_id(product_id).await?.is_none() {
            return Ok(false);
        }
        self.discard_locked(product_id).await?;
        self.products.delete(product_id).await?;
        Ok(true)
    }

    async fn discard_locked(&self, product_id: ProductId) -> Result<bool> {
        match self.transactions.find_pending_by_product(product_id).await? {
            Some(tx) => {
                self.transactions.delete(&tx).await?;
                metrics::counter!("ledger_writes_total", "write" => "discarded").increment(1);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reads the committed count and the pending transaction, then performs
    /// the single upsert or delete that makes the pending delta match.
    async fn write_pending(&self, product: &Product, desired: u64) -> Result<ProjectedQuantity> {
        let committed = self.items.count_by_product(product.id).await?;
        let pending = self.transactions.find_pending_by_product(product.id).await?;
        let delta = desired as i64 - committed as i64;

        let write = match (delta, pending) {
            (0, Some(tx)) => {
                self.transactions.delete(&tx).await?;
                LedgerWrite::Discarded
            }
            (0, None) => LedgerWrite::Unchanged,
            (_, Some(mut tx)) => {
                tx.rebase(committed, delta);
                self.transactions.save(tx).await?;
                LedgerWrite::Updated
            }
            (_, None) => {
                let tx = Transaction::pending(product.storage_id, product.id, committed, delta);
                self.transactions.save(tx).await?;
                LedgerWrite::Created
            }
        };

        metrics::counter!("ledger_writes_total", "write" => write.as_str()).increment(1);
        tracing::debug!(
            product_id = %product.id,
            committed,
            desired,
            delta,
            write = write.as_str(),
            "pending quantity recorded"
        );

        Ok(ProjectedQuantity {
            product_id: product.id,
            storage_id: product.storage_id,
            committed,
            projected: desired,
            write,
        })
    }
}
