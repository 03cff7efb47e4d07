use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, Cents, Direction, LedgerSnapshot, TransactionRecord,
};

use super::{Debit, LedgerStore, LedgerTx, MIGRATION_001_INITIAL};

const ACCOUNT_COLUMNS: &str =
    "id, first_name, last_name, email, balance_cents, opening_balance_cents, created_at";

const RECORD_COLUMNS: &str = "sequence, id, transfer_id, account_id, direction, amount_cents, description, counterparty_email, created_at";

/// How long a writer waits for another transfer's write lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite-backed ledger store.
///
/// Runs in WAL mode so `history` readers never wait on writers. Writers are
/// serialised by SQLite's single write lock; every [`SqliteTx`] issues its
/// conditional debit first, so the lock is taken before any balance is read.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL such as `sqlite:bank.db?mode=rwc`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?;
        let store = Self::connect_with(options).await?;
        debug!(database_url, "connected to sqlite");
        Ok(store)
    }

    /// Open the database file at `path` without going through a URL, so any
    /// file name is taken literally.
    pub async fn open(path: impl AsRef<Path>, create_if_missing: bool) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create_if_missing);
        let store = Self::connect_with(options).await?;
        debug!(path = %path.display(), "opened sqlite database");
        Ok(store)
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(DEFAULT_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to call on an already migrated database.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
            balance_cents: row.get("balance_cents"),
            opening_balance_cents: row.get("opening_balance_cents"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
        })
    }

    fn row_to_record(row: &SqliteRow) -> Result<TransactionRecord> {
        let id_str: String = row.get("id");
        let transfer_str: String = row.get("transfer_id");
        let account_str: String = row.get("account_id");
        let direction_str: String = row.get("direction");
        let created_at_str: String = row.get("created_at");

        Ok(TransactionRecord {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("sequence"),
            transfer_id: Uuid::parse_str(&transfer_str).context("Invalid transfer ID")?,
            account_id: Uuid::parse_str(&account_str).context("Invalid account ID")?,
            direction: Direction::from_str(&direction_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid direction: {}", direction_str))?,
            amount_cents: row.get("amount_cents"),
            description: row.get("description"),
            counterparty_email: row.get("counterparty_email"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn insert_account(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, first_name, last_name, email, balance_cents, opening_balance_cents, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.email)
        .bind(account.balance_cents)
        .bind(account.opening_balance_cents)
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch account by email")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY email"))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    async fn list_records(
        &self,
        account_id: AccountId,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = match before {
            Some(sequence) => {
                sqlx::query(&format!(
                    "SELECT {RECORD_COLUMNS} FROM transactions WHERE account_id = ? AND sequence < ? ORDER BY sequence DESC LIMIT ?"
                ))
                .bind(account_id.to_string())
                .bind(sequence)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {RECORD_COLUMNS} FROM transactions WHERE account_id = ? ORDER BY sequence DESC LIMIT ?"
                ))
                .bind(account_id.to_string())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        // Both reads share one read transaction so they see the same commit.
        let mut tx = self.pool.begin().await.context("Failed to open snapshot")?;

        let account_rows = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY email"))
            .fetch_all(&mut *tx)
            .await
            .context("Failed to read accounts")?;
        let record_rows = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM transactions ORDER BY sequence"))
            .fetch_all(&mut *tx)
            .await
            .context("Failed to read transactions")?;

        tx.commit().await.context("Failed to close snapshot")?;

        Ok(LedgerSnapshot {
            accounts: account_rows
                .iter()
                .map(Self::row_to_account)
                .collect::<Result<_>>()?,
            records: record_rows
                .iter()
                .map(Self::row_to_record)
                .collect::<Result<_>>()?,
        })
    }

    async fn begin(&self, accounts: &[AccountId]) -> Result<Box<dyn LedgerTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(SqliteTx {
            tx,
            accounts: accounts.to_vec(),
        }))
    }
}

/// A write transaction on the SQLite store. Rolled back by sqlx when dropped
/// without [`LedgerTx::commit`].
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
    accounts: Vec<AccountId>,
}

impl SqliteTx {
    fn ensure_locked(&self, account: AccountId) -> Result<()> {
        if !self.accounts.contains(&account) {
            bail!("Account {} is not part of this transaction", account);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for SqliteTx {
    async fn debit(&mut self, account: AccountId, amount: Cents) -> Result<Debit> {
        self.ensure_locked(account)?;
        let id = account.to_string();

        let applied = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents - ?
            WHERE id = ? AND balance_cents >= ?
            RETURNING balance_cents
            "#,
        )
        .bind(amount)
        .bind(&id)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to debit account")?;

        if let Some(row) = applied {
            return Ok(Debit::Applied {
                balance: row.try_get("balance_cents").context("Failed to read balance")?,
            });
        }

        let current = sqlx::query("SELECT balance_cents FROM accounts WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to read balance")?;

        match current {
            Some(row) => Ok(Debit::Insufficient {
                balance: row.try_get("balance_cents").context("Failed to read balance")?,
            }),
            None => bail!("Account {} vanished during transfer", account),
        }
    }

    async fn credit(&mut self, account: AccountId, amount: Cents) -> Result<Cents> {
        self.ensure_locked(account)?;
        let id = account.to_string();
        let headroom = Cents::MAX.checked_sub(amount).context("Balance overflow")?;

        // SQLite promotes an overflowing integer sum to REAL, so refuse it up front.
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents + ?
            WHERE id = ? AND balance_cents <= ?
            RETURNING balance_cents
            "#,
        )
        .bind(amount)
        .bind(&id)
        .bind(headroom)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to credit account")?;

        if let Some(row) = row {
            return row
                .try_get("balance_cents")
                .context("Failed to read credited balance");
        }

        let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to read balance")?;
        match exists {
            Some(_) => bail!("Balance overflow"),
            None => bail!("Account {} vanished during transfer", account),
        }
    }

    async fn append_record(&mut self, record: &TransactionRecord) -> Result<()> {
        self.ensure_locked(record.account_id)?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, transfer_id, account_id, direction, amount_cents, description, counterparty_email, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.transfer_id.to_string())
        .bind(record.account_id.to_string())
        .bind(record.direction.as_str())
        .bind(record.amount_cents)
        .bind(&record.description)
        .bind(&record.counterparty_email)
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await
        .context("Failed to save transaction record")?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transfer")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("Failed to roll back transfer")
    }
}
