//! Record stores for storages, products, items, and quantity transactions.
//!
//! The reconciliation services only see the store traits; [`InMemoryStore`]
//! and [`DocumentStore`] are the provided implementations.

pub mod document;
pub mod error;
pub mod memory;
pub mod record;
pub mod store;

pub use document::DocumentStore;
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use record::{Item, Product, Storage, Transaction, TransactionState};
pub use store::{ItemStore, ProductStore, StorageStore, TransactionStore};
