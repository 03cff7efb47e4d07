use thiserror::Error;

use crate::domain::{AccountId, Cents, ParseCentsError};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Cents, required: Cents },

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Cannot transfer to the sending account: {0}")]
    InvalidRecipient(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// The store failed. Any transfer in flight was rolled back first.
    #[error("Storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn account_not_found(id: AccountId) -> Self {
        LedgerError::AccountNotFound(id.to_string())
    }

    /// HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::InvalidRecipient(_)
            | LedgerError::MissingField(_)
            | LedgerError::InvalidEmail(_) => 400,
            LedgerError::RecipientNotFound(_) | LedgerError::AccountNotFound(_) => 404,
            LedgerError::AccountAlreadyExists(_) => 409,
            LedgerError::Storage(_) => 500,
        }
    }

    /// Caller-correctable. Never retried by the ledger.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<ParseCentsError> for LedgerError {
    fn from(err: ParseCentsError) -> Self {
        LedgerError::InvalidAmount(err.to_string())
    }
}
