use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;

/// A customer account. The balance is only ever changed by transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub first_name: String,
    pub last_name: String,
    /// Normalised (trimmed, lower-case) and unique across the ledger.
    pub email: String,
    pub balance_cents: Cents,
    /// Balance granted at registration; kept so audits can replay the account.
    pub opening_balance_cents: Cents,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: &str,
        opening_balance: Cents,
    ) -> Self {
        assert!(opening_balance >= 0, "Opening balance cannot be negative");
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: normalize_email(email),
            balance_cents: opening_balance,
            opening_balance_cents: opening_balance,
            created_at: Utc::now(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Registration input, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAccount {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Emails are compared case-insensitively and without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check: one `@` with something on both sides and no whitespace.
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}
