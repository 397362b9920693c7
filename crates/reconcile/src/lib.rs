//! Commit step for pending quantity changes.
//!
//! [`ReconciliationApplier`] brings every product with a pending change to
//! its target item count, then marks the change applied.

pub mod applier;
pub mod config;

pub use applier::{CommitReport, ReconciliationApplier};
pub use config::ReconcileConfig;
