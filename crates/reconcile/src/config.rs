//! Commit configuration loaded from environment variables.

/// Tuning for [`ReconciliationApplier`](crate::ReconciliationApplier).
///
/// Reads from environment variables:
/// - `RECONCILE_COMMIT_CONCURRENCY`: transactions materialized in parallel
///   during one commit (default: `4`, minimum `1`)
/// - `RECONCILE_PRUNE_APPLIED`: remove applied transactions after a fully
///   successful commit (default: `false`)
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub commit_concurrency: usize,
    pub prune_applied: bool,
}

impl ReconcileConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            commit_concurrency: std::env::var("RECONCILE_COMMIT_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.commit_concurrency)
                .max(1),
            prune_applied: std::env::var("RECONCILE_PRUNE_APPLIED")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.prune_applied),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            commit_concurrency: 4,
            prune_applied: false,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
