//! Ledger configuration loaded from environment variables.

/// Tuning for [`TransactionLedger`](crate::TransactionLedger).
///
/// Reads from environment variables:
/// - `LEDGER_MAX_CONFLICT_RETRIES`: how many times a write that lost an
///   optimistic revision check is re-read and retried (default: `3`)
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub max_conflict_retries: u32,
}

impl LedgerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            max_conflict_retries: std::env::var("LEDGER_MAX_CONFLICT_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
        }
    }
}
