use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, Cents, IntegrityReport, NewAccount, TransactionRecord, TransferReceipt,
    build_integrity_report, is_plausible_email, normalize_email, transfer_description,
};
use crate::storage::{Debit, LedgerStore, LedgerTx, MemoryStore, SqliteStore};

use super::{LedgerConfig, LedgerError};

/// Application service owning balances and transaction records.
/// This is the primary interface for any client (CLI, HTTP handler, tests).
///
/// Cloning is cheap: clones share the same store.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
}

/// One page of an account's history.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryQuery {
    /// Falls back to [`LedgerConfig::default_history_limit`]; clamped to
    /// [`LedgerConfig::max_history_limit`].
    pub limit: Option<usize>,
    /// Only records with a smaller sequence (older) are returned.
    pub before: Option<i64>,
}

impl LedgerService {
    /// Create a ledger service on top of any store.
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// A service backed by a fresh process-local store.
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Initialize a SQLite database at the given path, creating it if needed.
    pub async fn init(database_path: &str, config: LedgerConfig) -> Result<Self, LedgerError> {
        let store = SqliteStore::open(database_path, true).await?;
        store.migrate().await?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Connect to an existing SQLite database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> Result<Self, LedgerError> {
        let store = SqliteStore::open(database_path, false).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================
    // Account operations
    // ========================

    /// Register a new account holding the configured opening balance.
    pub async fn register_account(&self, new: NewAccount) -> Result<Account, LedgerError> {
        let first_name = new.first_name.trim();
        let last_name = new.last_name.trim();
        let email = new.email.trim();

        if first_name.is_empty() {
            return Err(LedgerError::MissingField("first_name"));
        }
        if last_name.is_empty() {
            return Err(LedgerError::MissingField("last_name"));
        }
        if email.is_empty() {
            return Err(LedgerError::MissingField("email"));
        }
        if !is_plausible_email(email) {
            return Err(LedgerError::InvalidEmail(email.to_string()));
        }
        if self.config.opening_balance < 0 {
            return Err(LedgerError::InvalidAmount(
                "Opening balance cannot be negative".to_string(),
            ));
        }

        let account = Account::new(first_name, last_name, email, self.config.opening_balance);
        if !self.store.insert_account(&account).await? {
            return Err(LedgerError::AccountAlreadyExists(account.email));
        }

        info!(account_id = %account.id, email = %account.email, "account registered");
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .find_account(id)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    pub async fn get_account_by_email(&self, email: &str) -> Result<Account, LedgerError> {
        self.store
            .find_account_by_email(&normalize_email(email))
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(email.trim().to_string()))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.list_accounts().await?)
    }

    // ========================
    // Transfer operations
    // ========================

    /// Move `amount_cents` from `sender_id` to the account registered under
    /// `recipient_email`.
    ///
    /// Either the debit, the credit and both records all commit, or nothing
    /// does. Once validation passes the work runs on its own task, so a caller
    /// that stops waiting does not interrupt it halfway.
    pub async fn transfer(
        &self,
        sender_id: AccountId,
        recipient_email: &str,
        amount_cents: Cents,
        description: Option<&str>,
    ) -> Result<TransferReceipt, LedgerError> {
        if amount_cents <= 0 {
            warn!(%sender_id, amount_cents, "transfer rejected: non-positive amount");
            return Err(LedgerError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let sender = self.get_account(sender_id).await?;
        let recipient = self
            .store
            .find_account_by_email(&normalize_email(recipient_email))
            .await?
            .ok_or_else(|| {
                warn!(%sender_id, recipient_email, "transfer rejected: unknown recipient");
                LedgerError::RecipientNotFound(recipient_email.trim().to_string())
            })?;

        if recipient.id == sender.id {
            warn!(%sender_id, "transfer rejected: sender and recipient are the same account");
            return Err(LedgerError::InvalidRecipient(recipient.email));
        }

        let description = transfer_description(description);
        let this = self.clone();
        tokio::spawn(async move {
            this.apply_transfer(sender, recipient, amount_cents, description)
                .await
        })
        .await
        .map_err(|e| LedgerError::Storage(anyhow::anyhow!("Transfer task failed: {}", e)))?
    }

    /// The atomic unit: open a transaction over both accounts, perform the
    /// four writes, then commit. Any error rolls everything back.
    async fn apply_transfer(
        &self,
        sender: Account,
        recipient: Account,
        amount_cents: Cents,
        description: String,
    ) -> Result<TransferReceipt, LedgerError> {
        let mut tx = self.begin_transfer(&[sender.id, recipient.id]).await?;

        let outcome =
            Self::write_transfer(tx.as_mut(), &sender, &recipient, amount_cents, &description)
                .await;

        match outcome {
            Ok(receipt) => {
                if let Err(err) = tx.commit().await {
                    error!(
                        sender = %sender.email,
                        recipient = %recipient.email,
                        amount_cents,
                        error = %err,
                        "transfer aborted at commit"
                    );
                    return Err(LedgerError::Storage(err));
                }
                info!(
                    transfer_id = %receipt.transfer_id,
                    sender = %sender.email,
                    recipient = %recipient.email,
                    amount_cents,
                    "transfer committed"
                );
                Ok(receipt)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    // The dropped transaction is still discarded by the store.
                    error!(error = %rollback_err, "explicit rollback failed");
                }
                match &err {
                    LedgerError::Storage(cause) => error!(
                        sender = %sender.email,
                        recipient = %recipient.email,
                        amount_cents,
                        error = %cause,
                        "transfer aborted and rolled back"
                    ),
                    other => warn!(
                        sender = %sender.email,
                        recipient = %recipient.email,
                        amount_cents,
                        reason = %other,
                        "transfer rejected"
                    ),
                }
                Err(err)
            }
        }
    }

    async fn write_transfer(
        tx: &mut dyn LedgerTx,
        sender: &Account,
        recipient: &Account,
        amount_cents: Cents,
        description: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        // Check and debit in one step, before anything else is written.
        if let Debit::Insufficient { balance } = tx.debit(sender.id, amount_cents).await? {
            return Err(LedgerError::InsufficientFunds {
                balance,
                required: amount_cents,
            });
        }
        tx.credit(recipient.id, amount_cents).await?;

        let completed_at = Utc::now();
        let transfer_id = Uuid::new_v4();
        let (outgoing, incoming) = TransactionRecord::pair(
            transfer_id,
            sender,
            recipient,
            amount_cents,
            description,
            completed_at,
        );
        tx.append_record(&outgoing).await?;
        tx.append_record(&incoming).await?;

        Ok(TransferReceipt {
            transfer_id,
            amount_cents,
            recipient_id: recipient.id,
            recipient_email: recipient.email.clone(),
            description: description.to_string(),
            completed_at,
        })
    }

    /// Opening the transaction is the only step retried: nothing has been
    /// written yet, so a retry cannot apply the transfer twice.
    async fn begin_transfer(&self, accounts: &[AccountId]) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let mut attempt = 0;
        let mut backoff = self.config.retry_backoff;
        loop {
            match self.store.begin(accounts).await {
                Ok(tx) => {
                    debug!(attempt, "transfer transaction opened");
                    return Ok(tx);
                }
                Err(err) if attempt < self.config.begin_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "could not open transfer transaction, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(LedgerError::Storage(err)),
            }
        }
    }

    // ========================
    // History
    // ========================

    /// Most recent records of an account, newest first, at most `limit`.
    pub async fn history(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.history_page(
            account_id,
            HistoryQuery {
                limit: Some(limit),
                before: None,
            },
        )
        .await
    }

    /// Keyset-paginated history. Pass the smallest `sequence` of one page as
    /// `before` to fetch the next.
    pub async fn history_page(
        &self,
        account_id: AccountId,
        query: HistoryQuery,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.get_account(account_id).await?;

        let limit = query
            .limit
            .unwrap_or(self.config.default_history_limit)
            .min(self.config.max_history_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        Ok(self
            .store
            .list_records(account_id, query.before, limit)
            .await?)
    }

    // ========================
    // Integrity
    // ========================

    /// Check conservation, non-negativity and record pairing across the ledger.
    pub async fn audit(&self) -> Result<IntegrityReport, LedgerError> {
        let snapshot = self.store.snapshot().await?;
        let report = build_integrity_report(&snapshot);
        if !report.is_healthy() {
            warn!(?report, "ledger integrity check failed");
        }
        Ok(report)
    }
}
