//! Reconciliation applier materializing pending transactions.

use std::sync::Arc;
use std::time::Instant;

use common::{ProductId, StorageId};
use domain::{InventoryError, KeyedLocks, Result, TransactionLedger};
use futures_util::{StreamExt, stream};
use store::{ItemStore, ProductStore, StorageStore, StoreError, TransactionStore};

use crate::config::ReconcileConfig;

/// Summary of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub storage_id: StorageId,
    /// Transactions marked applied.
    pub applied: usize,
    /// Pending transactions dropped because their product no longer exists.
    pub discarded: usize,
    pub items_created: u64,
    pub items_deleted: u64,
    /// Items that were already gone when their deletion was attempted.
    pub missing_items: u64,
    /// Applied transactions pruned after the commit.
    pub pruned: usize,
}

impl CommitReport {
    fn new(storage_id: StorageId) -> Self {
        Self {
            storage_id,
            applied: 0,
            discarded: 0,
            items_created: 0,
            items_deleted: 0,
            missing_items: 0,
            pruned: 0,
        }
    }

    /// Returns true if the commit changed nothing.
    pub fn is_noop(&self) -> bool {
        self.applied == 0 && self.discarded == 0
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied(m) => {
                self.applied += 1;
                self.items_created += m.created;
                self.items_deleted += m.deleted;
                self.missing_items += m.missing;
            }
            Outcome::Discarded => self.discarded += 1,
            Outcome::Gone => {}
        }
    }
}

/// Item writes performed for one transaction.
#[derive(Debug, Default)]
struct Materialized {
    created: u64,
    deleted: u64,
    missing: u64,
}

/// What happened to one product during a commit.
#[derive(Debug)]
enum Outcome {
    Applied(Materialized),
    /// The product was removed; its pending transaction was deleted.
    Discarded,
    /// The pending transaction was discarded by the ledger before the
    /// product lock was taken.
    Gone,
}

/// Converts pending transactions of a storage into item creations and
/// deletions.
///
/// Each product is materialized under the ledger's product lock, against the
/// pending transaction re-read under that lock. The number of items to create
/// or delete is recomputed from the live item count against the transaction's
/// target quantity on every run, so a commit that failed halfway converges on
/// retry instead of applying the delta twice. Surplus items are deleted oldest
/// first.
pub struct ReconciliationApplier<S, P, I, T>
where
    S: StorageStore,
    P: ProductStore,
    I: ItemStore,
    T: TransactionStore,
{
    storages: S,
    ledger: Arc<TransactionLedger<P, I, T>>,
    locks: KeyedLocks<StorageId>,
    config: ReconcileConfig,
}

impl<S, P, I, T> ReconciliationApplier<S, P, I, T>
where
    S: StorageStore,
    P: ProductStore,
    I: ItemStore,
    T: TransactionStore,
{
    /// Creates an applier sharing the given ledger, with default configuration.
    pub fn new(storages: S, ledger: Arc<TransactionLedger<P, I, T>>) -> Self {
        Self::with_config(storages, ledger, ReconcileConfig::default())
    }

    /// Creates an applier with explicit configuration.
    pub fn with_config(
        storages: S,
        ledger: Arc<TransactionLedger<P, I, T>>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            storages,
            ledger,
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Applies every pending transaction of a storage.
    ///
    /// Commits of the same storage are serialized. Every transaction is
    /// attempted even if another one fails; failed transactions stay pending
    /// and the first failure is returned as
    /// [`InventoryError::CommitIncomplete`].
    #[tracing::instrument(skip(self))]
    pub async fn commit_storage(&self, storage_id: StorageId) -> Result<CommitReport> {
        metrics::counter!("reconcile_commits_total").increment(1);
        let started = Instant::now();

        if self.storages.find_by_id(storage_id).await?.is_none() {
            return Err(InventoryError::StorageNotFound(storage_id));
        }

        let _guard = self.locks.acquire(storage_id).await;

        let pending = self
            .ledger
            .transactions()
            .find_all_pending_by_storage(storage_id)
            .await?;
        let total = pending.len();

        let applies: Vec<_> = pending
            .into_iter()
            .map(|tx| async move {
                let product_id = tx.product_id;
                (product_id, self.apply(product_id).await)
            })
            .collect();
        let outcomes: Vec<(ProductId, Result<Outcome>)> = stream::iter(applies)
            .buffer_unordered(self.config.commit_concurrency.max(1))
            .collect()
            .await;

        let mut report = CommitReport::new(storage_id);
        let mut failures = Vec::new();
        for (product_id, outcome) in outcomes {
            match outcome {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::warn!(%product_id, error = %e, "transaction left pending");
                    failures.push(e);
                }
            }
        }

        metrics::histogram!("reconcile_commit_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let failed = failures.len();
        if let Some(first) = failures.into_iter().next() {
            metrics::counter!("reconcile_commits_incomplete_total").increment(1);
            return Err(InventoryError::CommitIncomplete {
                storage_id,
                failed,
                total,
                source: Box::new(first),
            });
        }

        if self.config.prune_applied {
            report.pruned = self.ledger.transactions().prune_applied(storage_id).await?;
        }

        tracing::info!(
            %storage_id,
            applied = report.applied,
            discarded = report.discarded,
            items_created = report.items_created,
            items_deleted = report.items_deleted,
            missing_items = report.missing_items,
            "storage committed"
        );
        Ok(report)
    }

    /// Brings one product to its pending target quantity and marks the
    /// transaction applied.
    async fn apply(&self, product_id: ProductId) -> Result<Outcome> {
        let _guard = self.ledger.lock_product(product_id).await;
        let transactions = self.ledger.transactions();
        let items = self.ledger.items();

        let Some(mut tx) = transactions.find_pending_by_product(product_id).await? else {
            tracing::debug!(%product_id, "pending change discarded before commit");
            return Ok(Outcome::Gone);
        };

        if self.ledger.products().find_by_id(product_id).await?.is_none() {
            transactions.delete(&tx).await?;
            metrics::counter!("reconcile_transactions_discarded_total").increment(1);
            tracing::warn!(%product_id, "discarding pending change of removed product");
            return Ok(Outcome::Discarded);
        }

        let target = tx.target_quantity();
        let live = items.list_by_product(product_id).await?;
        let live_count = live.len() as u64;
        let mut done = Materialized::default();

        if target > live_count {
            for _ in 0..target - live_count {
                items.create(product_id).await?;
                done.created += 1;
            }
        } else if target < live_count {
            let surplus = (live_count - target) as usize;
            for item in live.iter().take(surplus) {
                match items.delete(item.id).await {
                    Ok(()) => done.deleted += 1,
                    Err(StoreError::ItemMissing(item_id)) => {
                        tracing::warn!(%item_id, %product_id, "item already removed");
                        done.missing += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tracing::debug!(
            %product_id,
            target,
            live = live_count,
            created = done.created,
            deleted = done.deleted,
            "product reconciled"
        );

        tx.mark_applied();
        transactions.save(tx).await?;

        metrics::counter!("reconcile_transactions_applied_total").increment(1);
        metrics::counter!("reconcile_items_created_total").increment(done.created);
        metrics::counter!("reconcile_items_deleted_total").increment(done.deleted);

        Ok(Outcome::Applied(done))
    }
}
