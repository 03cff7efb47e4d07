use std::time::Duration;

use crate::domain::Cents;

/// Tunables for [`LedgerService`](super::LedgerService).
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Balance granted to every newly registered account.
    pub opening_balance: Cents,
    /// Page size used when a caller does not ask for one.
    pub default_history_limit: usize,
    /// Upper bound on any history page.
    pub max_history_limit: usize,
    /// Extra attempts at opening a transfer transaction. Nothing has been
    /// written at that point, so retrying cannot double-apply.
    pub begin_retries: u32,
    /// Pause before the first retry; doubled on each further attempt.
    pub retry_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            opening_balance: 100_000,
            default_history_limit: 50,
            max_history_limit: 500,
            begin_retries: 2,
            retry_backoff: Duration::from_millis(25),
        }
    }
}

impl LedgerConfig {
    pub fn with_opening_balance(mut self, opening_balance: Cents) -> Self {
        self.opening_balance = opening_balance;
        self
    }

    pub fn with_begin_retries(mut self, retries: u32) -> Self {
        self.begin_retries = retries;
        self
    }
}
