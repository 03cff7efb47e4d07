use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::domain::{Account, AccountId, Cents, LedgerSnapshot, TransactionRecord};

use super::{Debit, LedgerStore, LedgerTx};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<AccountId, Account>,
    records: Vec<TransactionRecord>,
    last_sequence: i64,
}

/// Process-local ledger store without persistence.
///
/// Isolation comes from one async mutex per account. A transaction locks all
/// of its accounts in ascending id order before touching them, so two
/// transfers between the same pair of accounts in opposite directions cannot
/// deadlock. Writes are staged inside the transaction and published under the
/// state lock at commit, which keeps readers from ever seeing half a transfer.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    account_locks: Arc<Mutex<HashMap<AccountId, Arc<Mutex<()>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, account: AccountId) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        Arc::clone(locks.entry(account).or_default())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.accounts.values().any(|a| a.email == account.email) {
            return Ok(false);
        }
        state.accounts.insert(account.id, account.clone());
        Ok(true)
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self.state.lock().await.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(accounts)
    }

    async fn list_records(
        &self,
        account_id: AccountId,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .rev()
            .filter(|r| r.account_id == account_id)
            .filter(|r| before.is_none_or(|seq| r.sequence < seq))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(LedgerSnapshot {
            accounts,
            records: state.records.clone(),
        })
    }

    async fn begin(&self, accounts: &[AccountId]) -> Result<Box<dyn LedgerTx>> {
        let mut ordered = accounts.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for account in &ordered {
            let lock = self.lock_for(*account).await;
            guards.push(lock.lock_owned().await);
        }
        debug!(accounts = ?ordered, "memory transaction opened");

        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            accounts: ordered,
            _guards: guards,
            deltas: HashMap::new(),
            pending: Vec::new(),
        }))
    }
}

/// Staged writes plus the account locks that make them exclusive.
/// Dropping it releases the locks and forgets the staging.
pub struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    accounts: Vec<AccountId>,
    _guards: Vec<OwnedMutexGuard<()>>,
    deltas: HashMap<AccountId, Cents>,
    pending: Vec<TransactionRecord>,
}

impl MemoryTx {
    fn ensure_locked(&self, account: AccountId) -> Result<()> {
        if self.accounts.binary_search(&account).is_err() {
            bail!("Account {} is not part of this transaction", account);
        }
        Ok(())
    }

    /// Committed balance plus whatever this transaction has staged.
    async fn staged_balance(&self, account: AccountId) -> Result<Cents> {
        let state = self.state.lock().await;
        let committed = state
            .accounts
            .get(&account)
            .map(|a| a.balance_cents)
            .with_context(|| format!("Account {} vanished during transfer", account))?;
        let delta = self.deltas.get(&account).copied().unwrap_or(0);
        committed
            .checked_add(delta)
            .context("Balance overflow")
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn debit(&mut self, account: AccountId, amount: Cents) -> Result<Debit> {
        self.ensure_locked(account)?;
        let balance = self.staged_balance(account).await?;
        if balance < amount {
            return Ok(Debit::Insufficient { balance });
        }
        *self.deltas.entry(account).or_insert(0) -= amount;
        Ok(Debit::Applied {
            balance: balance - amount,
        })
    }

    async fn credit(&mut self, account: AccountId, amount: Cents) -> Result<Cents> {
        self.ensure_locked(account)?;
        let balance = self.staged_balance(account).await?;
        let updated = balance.checked_add(amount).context("Balance overflow")?;
        *self.deltas.entry(account).or_insert(0) += amount;
        Ok(updated)
    }

    async fn append_record(&mut self, record: &TransactionRecord) -> Result<()> {
        self.ensure_locked(record.account_id)?;
        self.pending.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            state,
            deltas,
            pending,
            _guards,
            ..
        } = *self;
        let mut state = state.lock().await;

        // Validate everything before publishing anything.
        let mut updated = Vec::with_capacity(deltas.len());
        for (account, delta) in &deltas {
            let current = state
                .accounts
                .get(account)
                .with_context(|| format!("Account {} vanished during transfer", account))?;
            let balance = current
                .balance_cents
                .checked_add(*delta)
                .context("Balance overflow")?;
            if balance < 0 {
                bail!("Commit would leave account {} negative", account);
            }
            updated.push((*account, balance));
        }

        for (account, balance) in updated {
            if let Some(a) = state.accounts.get_mut(&account) {
                a.balance_cents = balance;
            }
        }
        for mut record in pending {
            state.last_sequence += 1;
            record.sequence = state.last_sequence;
            state.records.push(record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
