//! Integration tests for the commit step.
//!
//! These tests drive the catalog, the ledger, the projector, and the applier
//! together over one store and check that interrupted or overlapping commits
//! converge to the last desired quantity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use common::{ItemId, ProductId, StorageId};
use domain::{CatalogService, InventoryError, ProjectedQuantity, TransactionLedger};
use projections::{InventoryView, QuantityProjector};
use reconcile::{ReconcileConfig, ReconciliationApplier};
use store::{InMemoryStore, Item, ItemStore, ProductStore, StoreError, TransactionStore};
use tokio::task::JoinHandle;

type MemoryLedger = TransactionLedger<InMemoryStore, InMemoryStore, InMemoryStore>;
type MemoryApplier =
    ReconciliationApplier<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryStore>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    store: InMemoryStore,
    catalog: CatalogService<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryStore>,
    ledger: Arc<MemoryLedger>,
    applier: Arc<MemoryApplier>,
    storage_id: StorageId,
}

impl Harness {
    async fn new() -> Self {
        init_tracing();
        let store = InMemoryStore::new();
        let ledger = Arc::new(TransactionLedger::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let catalog = CatalogService::new(store.clone(), ledger.clone());
        let applier = Arc::new(ReconciliationApplier::new(store.clone(), ledger.clone()));
        let storage = catalog.create_storage("Warehouse").await.unwrap();
        Self {
            store,
            catalog,
            ledger,
            applier,
            storage_id: storage.id,
        }
    }

    /// Creates a product and commits its initial quantity.
    async fn product(&self, name: &str, quantity: i64) -> ProductId {
        let created = self
            .catalog
            .create_product(self.storage_id, name, quantity)
            .await
            .unwrap();
        self.applier.commit_storage(self.storage_id).await.unwrap();
        created.product_id
    }

    async fn committed(&self, product_id: ProductId) -> u64 {
        self.store.count_by_product(product_id).await.unwrap()
    }

    fn projector(
        &self,
    ) -> QuantityProjector<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryStore> {
        QuantityProjector::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
        )
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn new_products_are_materialized_on_commit() {
        let h = Harness::new().await;
        let created = h
            .catalog
            .create_product(h.storage_id, "Bolts", 3)
            .await
            .unwrap();
        assert_eq!(h.committed(created.product_id).await, 0);

        let report = h.applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(report.items_created, 3);
        assert_eq!(h.committed(created.product_id).await, 3);
    }

    #[tokio::test]
    async fn commit_reaches_projected_quantities() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 3).await;
        let b = h.product("Nuts", 6).await;
        let c = h.product("Washers", 2).await;

        h.ledger.set_desired_quantity(a, 5).await.unwrap();
        h.ledger.set_desired_quantity(b, 0).await.unwrap();
        h.ledger.set_desired_quantity(c, 2).await.unwrap();

        let preview = h.projector().get_changed_view(h.storage_id).await.unwrap();
        assert_eq!(preview.len(), 2);

        let report = h.applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(report.applied, 2);
        for changed in &preview {
            assert_eq!(h.committed(changed.product_id).await, changed.projected);
        }
        assert_eq!(h.committed(c).await, 2);
        assert!(
            h.projector()
                .get_changed_view(h.storage_id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn overwritten_change_commits_last_desired_quantity() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 4).await;

        h.ledger.set_desired_quantity(a, 7).await.unwrap();
        h.ledger.set_desired_quantity(a, 5).await.unwrap();

        let preview = h.projector().get_changed_view(h.storage_id).await.unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].quantity_change, 1);
        assert_eq!(preview[0].projected, 5);

        let report = h.applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(report.items_created, 1);
        assert_eq!(h.committed(a).await, 5);
        assert!(h.ledger.pending_for(a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inventory_view_reports_committed_stock_only() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 2).await;
        h.ledger.set_desired_quantity(a, 9).await.unwrap();

        let view = InventoryView::new(h.store.clone(), h.store.clone(), h.store.clone());
        let before = view.storage_products(h.storage_id).await.unwrap();
        assert_eq!(before[0].quantity, 2);

        h.applier.commit_storage(h.storage_id).await.unwrap();

        let after = view.storage_products(h.storage_id).await.unwrap();
        assert_eq!(after[0].quantity, 9);
    }

    #[tokio::test]
    async fn removed_product_is_not_committed() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 1).await;
        h.ledger.set_desired_quantity(a, 4).await.unwrap();

        h.catalog.remove_product(a).await.unwrap();
        let report = h.applier.commit_storage(h.storage_id).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(h.committed(a).await, 1);
    }

    #[tokio::test]
    async fn change_of_product_deleted_behind_the_catalog_is_discarded() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 1).await;
        h.ledger.set_desired_quantity(a, 4).await.unwrap();
        ProductStore::delete(&h.store, a).await.unwrap();

        assert!(
            h.projector()
                .get_changed_view(h.storage_id)
                .await
                .unwrap()
                .is_empty()
        );
        let report = h.applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(report.items_created, 0);
        assert_eq!(h.committed(a).await, 1);
        assert!(h.ledger.pending_for(a).await.unwrap().is_none());
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn partial_item_failure_converges_on_retry() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 2).await;
        h.ledger.set_desired_quantity(a, 5).await.unwrap();

        h.store.fail_item_writes_after(1).await;
        let result = h.applier.commit_storage(h.storage_id).await;

        match result {
            Err(InventoryError::CommitIncomplete { failed, total, .. }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 1);
            }
            other => panic!("expected CommitIncomplete, got {other:?}"),
        }
        assert_eq!(h.committed(a).await, 3);
        assert!(h.ledger.pending_for(a).await.unwrap().is_some());

        h.store.heal().await;
        let report = h.applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(report.items_created, 2);
        assert_eq!(h.committed(a).await, 5);
        assert!(h.ledger.pending_for(a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn preview_after_partial_failure_matches_retry() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 3).await;
        h.ledger.set_desired_quantity(a, 5).await.unwrap();

        h.store.fail_item_writes_after(1).await;
        assert!(h.applier.commit_storage(h.storage_id).await.is_err());
        h.store.heal().await;

        let preview = h.projector().get_changed_view(h.storage_id).await.unwrap();
        assert_eq!(preview[0].committed, 4);
        assert_eq!(preview[0].quantity_change, 1);
        assert_eq!(preview[0].projected, 5);
        let projected = h.projector().projected_quantity(a).await.unwrap();

        h.applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(h.committed(a).await, projected);
        assert_eq!(h.committed(a).await, preview[0].projected);
    }

    #[tokio::test]
    async fn partial_deletion_failure_converges_on_retry() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 6).await;
        h.ledger.set_desired_quantity(a, 1).await.unwrap();

        h.store.fail_item_writes_after(2).await;
        assert!(h.applier.commit_storage(h.storage_id).await.is_err());
        assert_eq!(h.committed(a).await, 4);

        h.store.heal().await;
        h.applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(h.committed(a).await, 1);
    }

    #[tokio::test]
    async fn failed_status_write_does_not_duplicate_items() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 1).await;
        h.ledger.set_desired_quantity(a, 4).await.unwrap();

        h.store.set_fail_transaction_writes(true).await;
        assert!(h.applier.commit_storage(h.storage_id).await.is_err());
        assert_eq!(h.committed(a).await, 4);

        h.store.heal().await;
        let report = h.applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.items_created, 0);
        assert_eq!(h.committed(a).await, 4);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_other_products() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 0).await;
        let b = h.product("Nuts", 0).await;
        h.ledger.set_desired_quantity(a, 2).await.unwrap();
        h.ledger.set_desired_quantity(b, 2).await.unwrap();

        let applier = ReconciliationApplier::with_config(
            h.store.clone(),
            h.ledger.clone(),
            ReconcileConfig {
                commit_concurrency: 1,
                prune_applied: false,
            },
        );
        h.store.fail_item_writes_after(3).await;
        let result = applier.commit_storage(h.storage_id).await;

        assert!(matches!(
            result,
            Err(InventoryError::CommitIncomplete { failed: 1, total: 2, .. })
        ));
        let pending = h
            .store
            .find_all_pending_by_storage(h.storage_id)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        h.store.heal().await;
        applier.commit_storage(h.storage_id).await.unwrap();
        assert_eq!(h.committed(a).await, 2);
        assert_eq!(h.committed(b).await, 2);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_materialize_once() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 0).await;
        h.ledger.set_desired_quantity(a, 10).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let applier = h.applier.clone();
            let storage_id = h.storage_id;
            handles.push(tokio::spawn(async move {
                applier.commit_storage(storage_id).await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            applied += handle.await.unwrap().unwrap().applied;
        }

        assert_eq!(applied, 1);
        assert_eq!(h.committed(a).await, 10);
    }

    /// Commits a product at `committed` items with a pending target of
    /// `pending`, while a ledger call setting `desired` starts as soon as the
    /// applier has read the live items. Returns the final committed count
    /// after a follow-up commit.
    async fn commit_racing_ledger_write(committed: usize, pending: i64, desired: i64) -> u64 {
        init_tracing();
        let store = InMemoryStore::new();
        let ledger = Arc::new(TransactionLedger::new(
            store.clone(),
            Interfering::new(store.clone(), desired),
            store.clone(),
        ));
        let catalog = CatalogService::new(store.clone(), ledger.clone());
        let applier = ReconciliationApplier::new(store.clone(), ledger.clone());

        let storage = catalog.create_storage("Warehouse").await.unwrap();
        let product = catalog
            .create_product(storage.id, "Bolts", 0)
            .await
            .unwrap();
        let product_id = product.product_id;
        for _ in 0..committed {
            store.create(product_id).await.unwrap();
        }
        ledger.set_desired_quantity(product_id, pending).await.unwrap();

        ledger.items().arm(ledger.clone());
        let report = applier.commit_storage(storage.id).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(
            store.count_by_product(product_id).await.unwrap(),
            pending as u64
        );

        let writer = ledger.items().take_writer().expect("ledger write was started");
        let recorded = writer.await.unwrap().unwrap();
        assert_eq!(recorded.committed, pending as u64);
        assert_eq!(recorded.projected, desired as u64);

        applier.commit_storage(storage.id).await.unwrap();
        assert!(ledger.pending_for(product_id).await.unwrap().is_none());
        store.count_by_product(product_id).await.unwrap()
    }

    #[tokio::test]
    async fn ledger_write_back_to_old_count_during_commit_is_kept() {
        assert_eq!(commit_racing_ledger_write(2, 5, 2).await, 2);
    }

    #[tokio::test]
    async fn ledger_write_to_new_count_during_commit_is_kept() {
        assert_eq!(commit_racing_ledger_write(2, 5, 7).await, 7);
    }
}

mod missing_items {
    use super::*;

    #[tokio::test]
    async fn already_deleted_items_are_tolerated() {
        let h = Harness::new().await;
        let a = h.product("Bolts", 3).await;
        h.ledger.set_desired_quantity(a, 1).await.unwrap();

        let ledger = Arc::new(TransactionLedger::new(
            h.store.clone(),
            Phantom {
                inner: h.store.clone(),
            },
            h.store.clone(),
        ));
        let applier = ReconciliationApplier::new(h.store.clone(), ledger);

        let report = applier.commit_storage(h.storage_id).await.unwrap();

        assert_eq!(report.missing_items, 1);
        assert_eq!(report.items_deleted, 2);
        assert_eq!(h.committed(a).await, 1);
        assert!(h.ledger.pending_for(a).await.unwrap().is_none());
    }
}

mod document_backend {
    use super::*;
    use store::DocumentStore;
    use store::document::ITEMS;

    type DocumentLedger = TransactionLedger<DocumentStore, DocumentStore, DocumentStore>;

    struct Documents {
        store: DocumentStore,
        catalog: CatalogService<DocumentStore, DocumentStore, DocumentStore, DocumentStore>,
        ledger: Arc<DocumentLedger>,
        applier: ReconciliationApplier<DocumentStore, DocumentStore, DocumentStore, DocumentStore>,
        projector: QuantityProjector<DocumentStore, DocumentStore, DocumentStore, DocumentStore>,
        storage_id: StorageId,
    }

    async fn documents() -> Documents {
        init_tracing();
        let store = DocumentStore::new();
        let ledger = Arc::new(TransactionLedger::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let catalog = CatalogService::new(store.clone(), ledger.clone());
        let storage = catalog.create_storage("Cellar").await.unwrap();
        Documents {
            applier: ReconciliationApplier::new(store.clone(), ledger.clone()),
            projector: QuantityProjector::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
            ),
            catalog,
            ledger,
            store,
            storage_id: storage.id,
        }
    }

    #[tokio::test]
    async fn increase_and_decrease_round_trip_through_documents() {
        let d = documents().await;
        let wine = d
            .catalog
            .create_product(d.storage_id, "Wine", 3)
            .await
            .unwrap()
            .product_id;
        d.applier.commit_storage(d.storage_id).await.unwrap();
        let oldest = d.store.list_by_product(wine).await.unwrap();

        d.ledger.set_desired_quantity(wine, 5).await.unwrap();
        let preview = d.projector.get_changed_view(d.storage_id).await.unwrap();
        assert_eq!(preview[0].projected, 5);
        d.applier.commit_storage(d.storage_id).await.unwrap();
        assert_eq!(d.store.count_by_product(wine).await.unwrap(), 5);

        d.ledger.set_desired_quantity(wine, 2).await.unwrap();
        let report = d.applier.commit_storage(d.storage_id).await.unwrap();

        assert_eq!(report.items_deleted, 3);
        let remaining = d.store.list_by_product(wine).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|item| !oldest[..3].contains(item)));
        assert!(d.ledger.pending_for(wine).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_item_document_keeps_change_pending() {
        let d = documents().await;
        let wine = d
            .catalog
            .create_product(d.storage_id, "Wine", 2)
            .await
            .unwrap()
            .product_id;
        d.store
            .insert_raw(ITEMS, "corrupt", serde_json::json!({ "product_id": 7 }))
            .await;

        let result = d.applier.commit_storage(d.storage_id).await;

        match result {
            Err(InventoryError::CommitIncomplete { source, .. }) => {
                assert!(matches!(
                    *source,
                    InventoryError::Persistence(StoreError::Malformed { .. })
                ));
            }
            other => panic!("expected CommitIncomplete, got {other:?}"),
        }
        assert!(d.ledger.pending_for(wine).await.unwrap().is_some());
    }
}

/// Item store that lists one extra item that no longer exists.
struct Phantom {
    inner: InMemoryStore,
}

#[async_trait]
impl ItemStore for Phantom {
    async fn create(&self, product_id: ProductId) -> store::Result<Item> {
        self.inner.create(product_id).await
    }

    async fn delete(&self, item_id: ItemId) -> store::Result<()> {
        ItemStore::delete(&self.inner, item_id).await
    }

    async fn list_by_product(&self, product_id: ProductId) -> store::Result<Vec<Item>> {
        let mut items = vec![Item::new(product_id)];
        items.extend(self.inner.list_by_product(product_id).await?);
        Ok(items)
    }
}

type InterferingLedger = TransactionLedger<InMemoryStore, Interfering, InMemoryStore>;

/// Item store that starts a ledger call for the listed product the first
/// time items are listed after it is armed.
struct Interfering {
    inner: InMemoryStore,
    desired: i64,
    fired: AtomicBool,
    ledger: OnceLock<Arc<InterferingLedger>>,
    writer: Mutex<Option<JoinHandle<domain::Result<ProjectedQuantity>>>>,
}

impl Interfering {
    fn new(inner: InMemoryStore, desired: i64) -> Self {
        Self {
            inner,
            desired,
            fired: AtomicBool::new(false),
            ledger: OnceLock::new(),
            writer: Mutex::new(None),
        }
    }

    fn arm(&self, ledger: Arc<InterferingLedger>) {
        let _ = self.ledger.set(ledger);
    }

    fn take_writer(&self) -> Option<JoinHandle<domain::Result<ProjectedQuantity>>> {
        self.writer.lock().unwrap().take()
    }

    fn start_writer(&self, product_id: ProductId) {
        let Some(ledger) = self.ledger.get() else {
            return;
        };
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let ledger = ledger.clone();
        let desired = self.desired;
        *self.writer.lock().unwrap() = Some(tokio::spawn(async move {
            ledger.set_desired_quantity(product_id, desired).await
        }));
    }
}

#[async_trait]
impl ItemStore for Interfering {
    async fn create(&self, product_id: ProductId) -> store::Result<Item> {
        self.inner.create(product_id).await
    }

    async fn delete(&self, item_id: ItemId) -> store::Result<()> {
        ItemStore::delete(&self.inner, item_id).await
    }

    async fn list_by_product(&self, product_id: ProductId) -> store::Result<Vec<Item>> {
        let items = self.inner.list_by_product(product_id).await?;
        self.start_writer(product_id);
        Ok(items)
    }
}
