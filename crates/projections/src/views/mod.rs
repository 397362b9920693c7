//! Read model views for the query side.

pub mod changed;
pub mod inventory;

pub use changed::{ChangedProduct, QuantityProjector};
pub use inventory::{InventoryView, ProductQuantity, StorageWithProducts};
