use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Account, AccountId, Cents, Direction, TransactionRecord, TransferId, WideCents};

/// Accounts and records read at a single point in time.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub accounts: Vec<Account>,
    pub records: Vec<TransactionRecord>,
}

/// An account whose stored balance disagrees with its opening balance plus
/// the signed sum of its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub account_id: AccountId,
    pub email: String,
    pub stored: Cents,
    pub replayed: WideCents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub record_count: usize,
    pub total_balance: WideCents,
    /// Sum of opening balances. Transfers conserve funds, so this must equal
    /// `total_balance`.
    pub expected_total: WideCents,
    pub negative_balances: Vec<AccountId>,
    pub drifted_balances: Vec<BalanceDrift>,
    /// Transfers that are not exactly one outgoing and one incoming record of
    /// the same amount.
    pub unpaired_transfers: Vec<TransferId>,
    /// Records pointing at an account that does not exist.
    pub orphan_records: usize,
}

impl IntegrityReport {
    pub fn is_conserved(&self) -> bool {
        self.total_balance == self.expected_total
    }

    pub fn is_healthy(&self) -> bool {
        self.is_conserved()
            && self.negative_balances.is_empty()
            && self.drifted_balances.is_empty()
            && self.unpaired_transfers.is_empty()
            && self.orphan_records == 0
    }
}

#[derive(Default)]
struct TransferSides {
    outgoing: Vec<Cents>,
    incoming: Vec<Cents>,
}

/// Check conservation, non-negativity and record pairing over a snapshot.
pub fn build_integrity_report(snapshot: &LedgerSnapshot) -> IntegrityReport {
    // Sums are widened so no ledger state can overflow the check itself.
    let mut replayed: HashMap<AccountId, WideCents> = snapshot
        .accounts
        .iter()
        .map(|a| (a.id, WideCents::from(a.opening_balance_cents)))
        .collect();
    let mut transfers: HashMap<TransferId, TransferSides> = HashMap::new();
    let mut orphan_records = 0;

    for record in &snapshot.records {
        match replayed.get_mut(&record.account_id) {
            Some(balance) => *balance += WideCents::from(record.signed_amount()),
            None => orphan_records += 1,
        }
        let sides = transfers.entry(record.transfer_id).or_default();
        match record.direction {
            Direction::Outgoing => sides.outgoing.push(record.amount_cents),
            Direction::Incoming => sides.incoming.push(record.amount_cents),
        }
    }

    let mut unpaired_transfers: Vec<TransferId> = transfers
        .into_iter()
        .filter(|(_, sides)| {
            !(sides.outgoing.len() == 1
                && sides.incoming.len() == 1
                && sides.outgoing[0] == sides.incoming[0])
        })
        .map(|(id, _)| id)
        .collect();
    unpaired_transfers.sort();

    let drifted_balances = snapshot
        .accounts
        .iter()
        .filter_map(|a| {
            let expected = replayed
                .get(&a.id)
                .copied()
                .unwrap_or_else(|| a.opening_balance_cents.into());
            (expected != WideCents::from(a.balance_cents)).then(|| BalanceDrift {
                account_id: a.id,
                email: a.email.clone(),
                stored: a.balance_cents,
                replayed: expected,
            })
        })
        .collect();

    IntegrityReport {
        account_count: snapshot.accounts.len(),
        record_count: snapshot.records.len(),
        total_balance: snapshot.accounts.iter().map(|a| WideCents::from(a.balance_cents)).sum(),
        expected_total: snapshot
            .accounts
            .iter()
            .map(|a| WideCents::from(a.opening_balance_cents))
            .sum(),
        negative_balances: snapshot
            .accounts
            .iter()
            .filter(|a| a.balance_cents < 0)
            .map(|a| a.id)
            .collect(),
        drifted_balances,
        unpaired_transfers,
        orphan_records,
    }
}
