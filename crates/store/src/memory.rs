use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{ItemId, ProductId, StorageId, TransactionId};
use tokio::sync::RwLock;

use crate::store::{
    ItemStore, ProductStore, StorageStore, TransactionStore, check_revision, sort_oldest_first,
};
use crate::{Item, Product, Result, Storage, StoreError, Transaction};

#[derive(Debug, Default)]
struct MemoryState {
    storages: HashMap<StorageId, Storage>,
    products: HashMap<ProductId, Product>,
    items: HashMap<ProductId, Vec<Item>>,
    item_owners: HashMap<ItemId, ProductId>,
    transactions: HashMap<TransactionId, Transaction>,
    /// Keyed index enforcing one pending transaction per product.
    pending_by_product: HashMap<ProductId, TransactionId>,
    last_item_at: Option<DateTime<Utc>>,
    /// Remaining item writes before injected failures start.
    item_write_budget: Option<usize>,
    fail_transaction_writes: bool,
}

impl MemoryState {
    /// Returns a creation timestamp strictly after every earlier item.
    fn next_item_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_item_at {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last_item_at = Some(ts);
        ts
    }

    fn consume_item_write(&mut self) -> Result<()> {
        match self.item_write_budget.as_mut() {
            Some(0) => Err(StoreError::Unavailable(
                "injected item write failure".to_string(),
            )),
            Some(budget) => {
                *budget -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory implementation of every record store.
///
/// Clones share the same underlying state, so one instance can be handed to
/// each service that needs a different store trait.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of items across all products.
    pub async fn item_count(&self) -> usize {
        self.state.read().await.item_owners.len()
    }

    /// Returns the total number of transactions, pending and applied.
    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    /// Allows `writes` more item creations/deletions, then fails every
    /// further one with [`StoreError::Unavailable`].
    pub async fn fail_item_writes_after(&self, writes: usize) {
        self.state.write().await.item_write_budget = Some(writes);
    }

    /// Configures transaction saves and deletes to fail.
    pub async fn set_fail_transaction_writes(&self, fail: bool) {
        self.state.write().await.fail_transaction_writes = fail;
    }

    /// Removes any injected failure.
    pub async fn heal(&self) {
        let mut state = self.state.write().await;
        state.item_write_budget = None;
        state.fail_transaction_writes = false;
    }

    /// Clears all records.
    pub async fn clear(&self) {
        *self.state.write().await = MemoryState::default();
    }
}

#[async_trait]
impl StorageStore for InMemoryStore {
    async fn find_by_id(&self, id: StorageId) -> Result<Option<Storage>> {
        Ok(self.state.read().await.storages.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Storage>> {
        let state = self.state.read().await;
        let mut storages: Vec<_> = state.storages.values().cloned().collect();
        storages.sort_by_key(|s| (s.created_at, s.id));
        Ok(storages)
    }

    async fn save(&self, storage: Storage) -> Result<Storage> {
        let mut state = self.state.write().await;
        state.storages.insert(storage.id, storage.clone());
        Ok(storage)
    }

    async fn delete(&self, id: StorageId) -> Result<()> {
        self.state.write().await.storages.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn find_all_by_storage(&self, storage_id: StorageId) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let mut products: Vec<_> = state
            .products
            .values()
            .filter(|p| p.storage_id == storage_id)
            .cloned()
            .collect();
        products.sort_by_key(|p| (p.created_at, p.id));
        Ok(products)
    }

    async fn save(&self, product: Product) -> Result<Product> {
        let mut state = self.state.write().await;
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn delete(&self, id: ProductId) -> Result<()> {
        self.state.write().await.products.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn create(&self, product_id: ProductId) -> Result<Item> {
        let mut state = self.state.write().await;
        state.consume_item_write()?;

        let mut item = Item::new(product_id);
        item.created_at = state.next_item_timestamp();
        state.item_owners.insert(item.id, product_id);
        state.items.entry(product_id).or_default().push(item.clone());
        Ok(item)
    }

    async fn delete(&self, item_id: ItemId) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(&product_id) = state.item_owners.get(&item_id) else {
            return Err(StoreError::ItemMissing(item_id));
        };
        state.consume_item_write()?;

        state.item_owners.remove(&item_id);
        if let Some(items) = state.items.get_mut(&product_id) {
            items.retain(|i| i.id != item_id);
        }
        Ok(())
    }

    async fn list_by_product(&self, product_id: ProductId) -> Result<Vec<Item>> {
        let state = self.state.read().await;
        let mut items = state.items.get(&product_id).cloned().unwrap_or_default();
        sort_oldest_first(&mut items);
        Ok(items)
    }

    async fn count_by_product(&self, product_id: ProductId) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.items.get(&product_id).map_or(0, Vec::len) as u64)
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn find_pending_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .pending_by_product
            .get(&product_id)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn find_all_pending_by_storage(&self, storage_id: StorageId) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state
            .pending_by_product
            .values()
            .filter_map(|id| state.transactions.get(id))
            .filter(|t| t.storage_id == storage_id)
            .cloned()
            .collect();
        pending.sort_by_key(|t| (t.created_at, t.product_id));
        Ok(pending)
    }

    async fn save(&self, transaction: Transaction) -> Result<Transaction> {
        let mut state = self.state.write().await;
        if state.fail_transaction_writes {
            return Err(StoreError::Unavailable(
                "injected transaction write failure".to_string(),
            ));
        }

        if transaction.is_pending()
            && let Some(existing) = state.pending_by_product.get(&transaction.product_id)
            && *existing != transaction.id
        {
            return Err(StoreError::DuplicatePending {
                product_id: transaction.product_id.to_string(),
            });
        }

        let actual = state
            .transactions
            .get(&transaction.id)
            .map_or(0, |t| t.revision);
        check_revision("transaction", transaction.id, transaction.revision, actual)?;

        let mut stored = transaction;
        stored.revision += 1;

        if stored.is_pending() {
            state.pending_by_product.insert(stored.product_id, stored.id);
        } else if state.pending_by_product.get(&stored.product_id) == Some(&stored.id) {
            state.pending_by_product.remove(&stored.product_id);
        }
        state.transactions.insert(stored.id, stored.clone());

        Ok(stored)
    }

    async fn delete(&self, transaction: &Transaction) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_transaction_writes {
            return Err(StoreError::Unavailable(
                "injected transaction write failure".to_string(),
            ));
        }

        let actual = state
            .transactions
            .get(&transaction.id)
            .map_or(0, |t| t.revision);
        check_revision("transaction", transaction.id, transaction.revision, actual)?;

        state.transactions.remove(&transaction.id);
        if state.pending_by_product.get(&transaction.product_id) == Some(&transaction.id) {
            state.pending_by_product.remove(&transaction.product_id);
        }
        Ok(())
    }

    async fn prune_applied(&self, storage_id: StorageId) -> Result<usize> {
        let mut state = self.state.write().await;
        let before = state.transactions.len();
        state
            .transactions
            .retain(|_, t| t.is_pending() || t.storage_id != storage_id);
        Ok(before - state.transactions.len())
    }
}
