//! Read models for the query side.
//!
//! This crate never writes to a store:
//! - [`QuantityProjector`] previews pending quantity changes per storage
//! - [`InventoryView`] reports committed quantities of storages and products

pub mod views;

pub use views::{
    ChangedProduct, InventoryView, ProductQuantity, QuantityProjector, StorageWithProducts,
};
