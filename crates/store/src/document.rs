//! Schemaless document store.
//!
//! Records are kept as JSON documents keyed by id inside named collections,
//! the way key-value browser or embedded stores hold them. Every read decodes
//! the document into its typed record; a document that does not fit the
//! record shape surfaces as [`StoreError::Malformed`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{ItemId, ProductId, StorageId, TransactionId};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::{
    ItemStore, ProductStore, StorageStore, TransactionStore, check_revision, sort_oldest_first,
};
use crate::{Item, Product, Result, Storage, StoreError, Transaction};

/// Collection holding [`Storage`] documents.
pub const STORAGES: &str = "storages";
/// Collection holding [`Product`] documents.
pub const PRODUCTS: &str = "products";
/// Collection holding [`Item`] documents.
pub const ITEMS: &str = "items";
/// Collection holding [`Transaction`] documents.
pub const TRANSACTIONS: &str = "transactions";

#[derive(Debug, Default)]
struct Documents {
    collections: HashMap<&'static str, BTreeMap<String, Value>>,
    /// Keyed index enforcing one pending transaction per product.
    pending_by_product: HashMap<ProductId, TransactionId>,
    last_item_at: Option<DateTime<Utc>>,
}

impl Documents {
    fn decode<T: DeserializeOwned>(collection: &'static str, key: &str, doc: &Value) -> Result<T> {
        T::deserialize(doc).map_err(|source| StoreError::Malformed {
            collection,
            key: key.to_string(),
            source,
        })
    }

    fn get<T: DeserializeOwned>(&self, collection: &'static str, key: &str) -> Result<Option<T>> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(key))
            .map(|doc| Self::decode(collection, key, doc))
            .transpose()
    }

    /// Decodes every document of a collection, keeping those matching `filter`.
    ///
    /// Any malformed document fails the whole scan.
    fn scan<T, F>(&self, collection: &'static str, filter: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut matched = Vec::new();
        for (key, doc) in docs {
            let record: T = Self::decode(collection, key, doc)?;
            if filter(&record) {
                matched.push(record);
            }
        }
        Ok(matched)
    }

    fn put<T: Serialize>(&mut self, collection: &'static str, key: String, record: &T) -> Result<()> {
        let doc = serde_json::to_value(record)?;
        self.collections
            .entry(collection)
            .or_default()
            .insert(key, doc);
        Ok(())
    }

    fn remove(&mut self, collection: &'static str, key: &str) -> bool {
        self.collections
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(key).is_some())
    }

    /// Points the pending index at `transaction` if it is pending, or drops
    /// its entry once it is not.
    fn index_transaction(&mut self, transaction: &Transaction) {
        if transaction.is_pending() {
            self.pending_by_product
                .insert(transaction.product_id, transaction.id);
        } else {
            self.unindex_transaction(transaction);
        }
    }

    fn unindex_transaction(&mut self, transaction: &Transaction) {
        if self.pending_by_product.get(&transaction.product_id) == Some(&transaction.id) {
            self.pending_by_product.remove(&transaction.product_id);
        }
    }

    fn pending_transaction(&self, product_id: ProductId) -> Result<Option<Transaction>> {
        match self.pending_by_product.get(&product_id) {
            Some(id) => self.get(TRANSACTIONS, &id.to_string()),
            None => Ok(None),
        }
    }

    fn next_item_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_item_at {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last_item_at = Some(ts);
        ts
    }
}

/// JSON document implementation of every record store.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    docs: Arc<RwLock<Documents>>,
}

impl DocumentStore {
    /// Creates a new empty document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a raw document, bypassing record encoding.
    ///
    /// Used when importing data written by another producer. A raw
    /// transaction joins the pending index only if it decodes.
    pub async fn insert_raw(&self, collection: &'static str, key: impl Into<String>, doc: Value) {
        let mut docs = self.docs.write().await;
        let key = key.into();
        if collection == TRANSACTIONS {
            docs.pending_by_product.retain(|_, id| id.to_string() != key);
            if let Ok(transaction) = Transaction::deserialize(&doc) {
                docs.index_transaction(&transaction);
            }
        }
        docs.collections
            .entry(collection)
            .or_default()
            .insert(key, doc);
    }

    /// Returns the raw document stored under `key`, if any.
    pub async fn get_raw(&self, collection: &'static str, key: &str) -> Option<Value> {
        self.docs
            .read()
            .await
            .collections
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    /// Returns the number of documents in a collection.
    pub async fn len(&self, collection: &'static str) -> usize {
        self.docs
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if the collection holds no documents.
    pub async fn is_empty(&self, collection: &'static str) -> bool {
        self.len(collection).await == 0
    }
}

#[async_trait]
impl StorageStore for DocumentStore {
    async fn find_by_id(&self, id: StorageId) -> Result<Option<Storage>> {
        self.docs.read().await.get(STORAGES, &id.to_string())
    }

    async fn find_all(&self) -> Result<Vec<Storage>> {
        let mut storages: Vec<Storage> = self.docs.read().await.scan(STORAGES, |_| true)?;
        storages.sort_by_key(|s| (s.created_at, s.id));
        Ok(storages)
    }

    async fn save(&self, storage: Storage) -> Result<Storage> {
        self.docs
            .write()
            .await
            .put(STORAGES, storage.id.to_string(), &storage)?;
        Ok(storage)
    }

    async fn delete(&self, id: StorageId) -> Result<()> {
        self.docs.write().await.remove(STORAGES, &id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ProductStore for DocumentStore {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        self.docs.read().await.get(PRODUCTS, &id.to_string())
    }

    async fn find_all_by_storage(&self, storage_id: StorageId) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self
            .docs
            .read()
            .await
            .scan(PRODUCTS, |p: &Product| p.storage_id == storage_id)?;
        products.sort_by_key(|p| (p.created_at, p.id));
        Ok(products)
    }

    async fn save(&self, product: Product) -> Result<Product> {
        self.docs
            .write()
            .await
            .put(PRODUCTS, product.id.to_string(), &product)?;
        Ok(product)
    }

    async fn delete(&self, id: ProductId) -> Result<()> {
        self.docs.write().await.remove(PRODUCTS, &id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ItemStore for DocumentStore {
    async fn create(&self, product_id: ProductId) -> Result<Item> {
        let mut docs = self.docs.write().await;
        let mut item = Item::new(product_id);
        item.created_at = docs.next_item_timestamp();
        docs.put(ITEMS, item.id.to_string(), &item)?;
        Ok(item)
    }

    async fn delete(&self, item_id: ItemId) -> Result<()> {
        if self.docs.write().await.remove(ITEMS, &item_id.to_string()) {
            Ok(())
        } else {
            Err(StoreError::ItemMissing(item_id))
        }
    }

    async fn list_by_product(&self, product_id: ProductId) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .docs
            .read()
            .await
            .scan(ITEMS, |i: &Item| i.product_id == product_id)?;
        sort_oldest_first(&mut items);
        Ok(items)
    }
}

#[async_trait]
impl TransactionStore for DocumentStore {
    async fn find_pending_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Transaction>> {
        self.docs.read().await.pending_transaction(product_id)
    }

    async fn find_all_pending_by_storage(&self, storage_id: StorageId) -> Result<Vec<Transaction>> {
        let docs = self.docs.read().await;
        let mut pending = Vec::new();
        for id in docs.pending_by_product.values() {
            if let Some(tx) = docs.get::<Transaction>(TRANSACTIONS, &id.to_string())?
                && tx.storage_id == storage_id
            {
                pending.push(tx);
            }
        }
        pending.sort_by_key(|t| (t.created_at, t.product_id));
        Ok(pending)
    }

    async fn save(&self, transaction: Transaction) -> Result<Transaction> {
        let mut docs = self.docs.write().await;
        let key = transaction.id.to_string();

        if transaction.is_pending()
            && let Some(existing) = docs.pending_by_product.get(&transaction.product_id)
            && *existing != transaction.id
        {
            return Err(StoreError::DuplicatePending {
                product_id: transaction.product_id.to_string(),
            });
        }

        let actual = docs
            .get::<Transaction>(TRANSACTIONS, &key)?
            .map_or(0, |t| t.revision);
        check_revision("transaction", &key, transaction.revision, actual)?;

        let mut stored = transaction;
        stored.revision += 1;
        docs.put(TRANSACTIONS, key, &stored)?;
        docs.index_transaction(&stored);
        Ok(stored)
    }

    async fn delete(&self, transaction: &Transaction) -> Result<()> {
        let mut docs = self.docs.write().await;
        let key = transaction.id.to_string();

        let actual = docs
            .get::<Transaction>(TRANSACTIONS, &key)?
            .map_or(0, |t| t.revision);
        check_revision("transaction", &key, transaction.revision, actual)?;

        docs.remove(TRANSACTIONS, &key);
        docs.unindex_transaction(transaction);
        Ok(())
    }

    async fn prune_applied(&self, storage_id: StorageId) -> Result<usize> {
        let mut docs = self.docs.write().await;
        let applied: Vec<Transaction> = docs.scan(TRANSACTIONS, |t: &Transaction| {
            !t.is_pending() && t.storage_id == storage_id
        })?;
        for tx in &applied {
            docs.remove(TRANSACTIONS, &tx.id.to_string());
        }
        Ok(applied.len())
    }
}
