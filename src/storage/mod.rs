//! Persistence ports for the ledger and the adapters that implement them.
//!
//! [`LedgerStore`] covers reads and account creation. Every balance mutation
//! goes through a [`LedgerTx`] opened with [`LedgerStore::begin`]: the
//! transaction holds exclusive access to the accounts it was opened for, its
//! writes become visible together on [`LedgerTx::commit`], and dropping it
//! without committing discards them.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Account, AccountId, Cents, LedgerSnapshot, TransactionRecord};

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Outcome of a conditional debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    /// The balance covered the amount and now holds `balance`.
    Applied { balance: Cents },
    /// The balance did not cover the amount and was left untouched.
    Insufficient { balance: Cents },
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new account. Returns `false` without writing if the email is taken.
    async fn insert_account(&self, account: &Account) -> Result<bool>;

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>>;

    /// `email` must already be normalised.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// All accounts, ordered by email.
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Committed records of one account, newest first. With `before`, only
    /// records whose sequence is strictly smaller are returned.
    async fn list_records(
        &self,
        account_id: AccountId,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>>;

    /// A consistent view of every account and record.
    async fn snapshot(&self) -> Result<LedgerSnapshot>;

    /// Open a write transaction with exclusive access to `accounts`.
    /// May wait for other transactions touching the same accounts.
    async fn begin(&self, accounts: &[AccountId]) -> Result<Box<dyn LedgerTx>>;
}

#[async_trait]
pub trait LedgerTx: Send {
    /// Subtract `amount` from the account only if its balance covers it.
    /// The check and the write are one step.
    async fn debit(&mut self, account: AccountId, amount: Cents) -> Result<Debit>;

    /// Add `amount` to the account, returning the new balance.
    async fn credit(&mut self, account: AccountId, amount: Cents) -> Result<Cents>;

    /// Stage a record; the store assigns its sequence.
    async fn append_record(&mut self, record: &TransactionRecord) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
