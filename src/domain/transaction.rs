use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Account, AccountId, Cents};

pub type TransactionId = Uuid;
pub type TransferId = Uuid;

pub const DEFAULT_TRANSFER_DESCRIPTION: &str = "Money transfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Funds left the owning account
    Outgoing,
    /// Funds arrived in the owning account
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "outgoing" => Some(Direction::Outgoing),
            "incoming" => Some(Direction::Incoming),
            _ => None,
        }
    }

    /// Signed effect of a record in this direction on the owner's balance.
    pub fn signed(&self, amount_cents: Cents) -> Cents {
        match self {
            Direction::Outgoing => -amount_cents,
            Direction::Incoming => amount_cents,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One side of a completed transfer, as seen from the owning account.
/// Records are immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Strictly increasing in commit order. Assigned by the store.
    pub sequence: i64,
    /// Shared by the outgoing and incoming record of the same transfer
    pub transfer_id: TransferId,
    pub account_id: AccountId,
    pub direction: Direction,
    /// Always positive
    pub amount_cents: Cents,
    pub description: String,
    pub counterparty_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Build the outgoing and incoming records for a transfer of `amount_cents`
    /// from `sender` to `recipient`. Sequence numbers are left at zero.
    pub fn pair(
        transfer_id: TransferId,
        sender: &Account,
        recipient: &Account,
        amount_cents: Cents,
        description: &str,
        at: DateTime<Utc>,
    ) -> (Self, Self) {
        assert!(amount_cents > 0, "Transfer amount must be positive");

        let outgoing = Self {
            id: Uuid::new_v4(),
            sequence: 0,
            transfer_id,
            account_id: sender.id,
            direction: Direction::Outgoing,
            amount_cents,
            description: description.to_string(),
            counterparty_email: Some(recipient.email.clone()),
            created_at: at,
        };
        let incoming = Self {
            id: Uuid::new_v4(),
            sequence: 0,
            transfer_id,
            account_id: recipient.id,
            direction: Direction::Incoming,
            amount_cents,
            description: format!("Received from {}", sender.email),
            counterparty_email: Some(sender.email.clone()),
            created_at: at,
        };
        (outgoing, incoming)
    }

    pub fn signed_amount(&self) -> Cents {
        self.direction.signed(self.amount_cents)
    }
}

/// Returned to the caller once a transfer has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub amount_cents: Cents,
    pub recipient_id: AccountId,
    pub recipient_email: String,
    pub description: String,
    pub completed_at: DateTime<Utc>,
}

/// Pick the description stored on the outgoing record.
pub fn transfer_description(description: Option<&str>) -> String {
    match description.map(str::trim) {
        Some(d) if !d.is_empty() => d.to_string(),
        _ => DEFAULT_TRANSFER_DESCRIPTION.to_string(),
    }
}
