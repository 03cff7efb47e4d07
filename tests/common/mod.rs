// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use bankroll::application::{HistoryQuery, LedgerConfig, LedgerService};
use bankroll::domain::{Account, AccountId, Cents, LedgerSnapshot, NewAccount, TransactionRecord};
use bankroll::storage::{Debit, LedgerStore, LedgerTx, MemoryStore, SqliteStore};
use tempfile::TempDir;

/// Helper to create a test service with a temporary SQLite database
pub async fn test_service(config: LedgerConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap(), config).await?;
    Ok((service, temp_dir))
}

/// A temporary SQLite store, for wrapping in other stores.
pub async fn sqlite_store() -> Result<(Arc<SqliteStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let store = SqliteStore::init(&format!("sqlite:{}?mode=rwc", db_path.display())).await?;
    Ok((Arc::new(store), temp_dir))
}

/// The same configuration served by every store implementation.
pub struct Backends {
    pub services: Vec<(&'static str, LedgerService)>,
    _dir: TempDir,
}

pub async fn backends(config: LedgerConfig) -> Result<Backends> {
    let (sqlite, dir) = test_service(config.clone()).await?;
    Ok(Backends {
        services: vec![("sqlite", sqlite), ("memory", LedgerService::in_memory(config))],
        _dir: dir,
    })
}

/// Config whose accounts open with `balance` cents.
pub fn opening(balance: Cents) -> LedgerConfig {
    LedgerConfig::default().with_opening_balance(balance)
}

pub async fn register(service: &LedgerService, name: &str) -> Result<Account> {
    Ok(service
        .register_account(NewAccount {
            first_name: name.to_string(),
            last_name: "Tester".to_string(),
            email: format!("{}@bank.test", name.to_lowercase()),
        })
        .await?)
}

pub async fn balance(service: &LedgerService, id: AccountId) -> Result<Cents> {
    Ok(service.get_account(id).await?.balance_cents)
}

/// Counts every record of an account by walking all history pages.
pub async fn record_count(service: &LedgerService, id: AccountId) -> Result<usize> {
    let mut count = 0;
    let mut before = None;
    loop {
        let page = service
            .history_page(
                id,
                HistoryQuery {
                    limit: Some(service.config().max_history_limit),
                    before,
                },
            )
            .await?;
        match page.last() {
            Some(oldest) => before = Some(oldest.sequence),
            None => return Ok(count),
        }
        count += page.len();
    }
}

pub async fn total_funds(service: &LedgerService) -> Result<Cents> {
    Ok(service
        .list_accounts()
        .await?
        .iter()
        .map(|a| a.balance_cents)
        .sum())
}

/// Where a [`FaultyStore`] injects its failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Begin,
    Debit,
    Credit,
    FirstRecord,
    SecondRecord,
    Commit,
}

/// Wraps a real store and fails the chosen step a fixed number of times.
pub struct FaultyStore {
    inner: Arc<dyn LedgerStore>,
    fail_at: FailAt,
    failures_left: Arc<AtomicU32>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn LedgerStore>, fail_at: FailAt, times: u32) -> Self {
        Self {
            inner,
            fail_at,
            failures_left: Arc::new(AtomicU32::new(times)),
        }
    }

    pub fn failures_left(&self) -> u32 {
        self.failures_left.load(Ordering::SeqCst)
    }
}

fn take_failure(fail_at: FailAt, step: FailAt, failures_left: &AtomicU32) -> bool {
    step == fail_at
        && failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn insert_account(&self, account: &Account) -> Result<bool> {
        self.inner.insert_account(account).await
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.inner.find_account(id).await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.inner.find_account_by_email(email).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn list_records(
        &self,
        account_id: AccountId,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        self.inner.list_records(account_id, before, limit).await
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.inner.snapshot().await
    }

    async fn begin(&self, accounts: &[AccountId]) -> Result<Box<dyn LedgerTx>> {
        if take_failure(self.fail_at, FailAt::Begin, &self.failures_left) {
            bail!("injected failure: begin");
        }
        let inner = self.inner.begin(accounts).await?;
        Ok(Box::new(FaultyTx {
            inner,
            fail_at: self.fail_at,
            failures_left: Arc::clone(&self.failures_left),
            records_appended: 0,
        }))
    }
}

struct FaultyTx {
    inner: Box<dyn LedgerTx>,
    fail_at: FailAt,
    failures_left: Arc<AtomicU32>,
    records_appended: u32,
}

impl FaultyTx {
    fn fail(&self, step: FailAt) -> bool {
        take_failure(self.fail_at, step, &self.failures_left)
    }
}

#[async_trait]
impl LedgerTx for FaultyTx {
    async fn debit(&mut self, account: AccountId, amount: Cents) -> Result<Debit> {
        if self.fail(FailAt::Debit) {
            bail!("injected failure: debit");
        }
        self.inner.debit(account, amount).await
    }

    async fn credit(&mut self, account: AccountId, amount: Cents) -> Result<Cents> {
        if self.fail(FailAt::Credit) {
            bail!("injected failure: credit");
        }
        self.inner.credit(account, amount).await
    }

    async fn append_record(&mut self, record: &TransactionRecord) -> Result<()> {
        let step = if self.records_appended == 0 {
            FailAt::FirstRecord
        } else {
            FailAt::SecondRecord
        };
        if self.fail(step) {
            bail!("injected failure: append record");
        }
        self.inner.append_record(record).await?;
        self.records_appended += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.fail(FailAt::Commit) {
            // Dropping the inner transaction discards its writes.
            bail!("injected failure: commit");
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

/// A service over `FaultyStore(memory)` and one over `FaultyStore(sqlite)`.
pub async fn faulty_backends(
    config: LedgerConfig,
    fail_at: FailAt,
    times: u32,
) -> Result<(Vec<(&'static str, LedgerService)>, TempDir)> {
    let (sqlite, dir) = sqlite_store().await?;
    let memory: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
    let services = vec![
        (
            "sqlite",
            LedgerService::new(
                Arc::new(FaultyStore::new(sqlite, fail_at, times)),
                config.clone(),
            ),
        ),
        (
            "memory",
            LedgerService::new(Arc::new(FaultyStore::new(memory, fail_at, times)), config),
        ),
    ];
    Ok((services, dir))
}
