//! The ledger: a mapping from address to balance, with `MINE` carrying an
//! implicit infinite balance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::Receipt;
use crate::wallet::MINE;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sender {sender} cannot cover {amount} (available: {available})")]
    InsufficientFunds {
        sender: String,
        amount: u64,
        available: Balance,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Balance {
    Finite(i64),
    Infinite,
}

impl std::fmt::Display for Balance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Balance::Finite(v) => write!(f, "{v}"),
            Balance::Infinite => write!(f, "+inf"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    balances: HashMap<String, Balance>,
}

impl Ledger {
    pub fn new() -> Self {
        let mut balances = HashMap::new();
        balances.insert(MINE.to_string(), Balance::Infinite);
        Ledger { balances }
    }

    pub fn balance_of(&self, address: &str) -> Balance {
        self.balances
            .get(address)
            .copied()
            .unwrap_or(Balance::Finite(0))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Balance)> {
        self.balances.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn credit(&mut self, address: &str, amount: u64) {
        let entry = self
            .balances
            .entry(address.to_string())
            .or_insert(Balance::Finite(0));
        *entry = match entry {
            Balance::Infinite => Balance::Infinite,
            Balance::Finite(v) => Balance::Finite(*v + amount as i64),
        };
    }

    fn debit(&mut self, address: &str, amount: u64) {
        if address == MINE {
            return;
        }
        let entry = self
            .balances
            .entry(address.to_string())
            .or_insert(Balance::Finite(0));
        *entry = match entry {
            Balance::Infinite => Balance::Infinite,
            Balance::Finite(v) => Balance::Finite(*v - amount as i64),
        };
    }

    /// Debits `address` for `amount` if it can cover it (always true for
    /// `MINE`), otherwise returns the shortfall as a [`LedgerError`] and
    /// leaves the balance untouched.
    fn checked_debit(&mut self, address: &str, amount: u64) -> Result<(), LedgerError> {
        if address == MINE {
            return Ok(());
        }
        let available = self.balance_of(address);
        let sufficient = match available {
            Balance::Infinite => true,
            Balance::Finite(v) => v >= amount as i64,
        };
        if !sufficient {
            return Err(LedgerError::InsufficientFunds {
                sender: address.to_string(),
                amount,
                available,
            });
        }
        self.debit(address, amount);
        Ok(())
    }

    /// Applies every receipt of an already-accepted block in order:
    /// debits the sender (unless it is `MINE`) and credits the receiver.
    /// Fails on the first receipt the current balances can't cover,
    /// leaving the ledger exactly as it stood before that receipt.
    pub fn apply(&mut self, receipts: &[Receipt]) -> Result<(), LedgerError> {
        for receipt in receipts {
            self.checked_debit(&receipt.sender, receipt.amount)?;
            self.credit(&receipt.receiver, receipt.amount);
        }
        Ok(())
    }

    /// Walks `receipts` in order against a snapshot of the current ledger,
    /// dropping any receipt whose sender cannot cover the amount given the
    /// effect of prior firm receipts in the same batch. Returns the firm
    /// subset, in original order.
    pub fn validate_batch(&self, receipts: &[Receipt]) -> Vec<Receipt> {
        let mut local = self.clone();
        let mut firm = Vec::with_capacity(receipts.len());

        for receipt in receipts {
            match local.checked_debit(&receipt.sender, receipt.amount) {
                Ok(()) => {
                    local.credit(&receipt.receiver, receipt.amount);
                    firm.push(receipt.clone());
                }
                Err(err) => {
                    log::warn!(
                        "rejecting receipt with signature {}: {err}",
                        receipt.signature
                    );
                }
            }
        }

        firm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(sender: &str, receiver: &str, amount: u64) -> Receipt {
        Receipt {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
            signature: "sig".to_string(),
        }
    }

    #[test]
    fn coinbase_always_firm() {
        let ledger = Ledger::new();
        let firm = ledger.validate_batch(&[receipt(MINE, "alice", 10)]);
        assert_eq!(firm.len(), 1);
    }

    #[test]
    fn dependent_transfer_within_batch() {
        let ledger = Ledger::new();
        let batch = vec![receipt(MINE, "alice", 10), receipt("alice", "bob", 7)];
        let firm = ledger.validate_batch(&batch);
        assert_eq!(firm.len(), 2);
    }

    #[test]
    fn insufficient_funds_is_dropped() {
        let mut ledger = Ledger::new();
        ledger.apply(&[receipt(MINE, "alice", 10)]).unwrap();
        ledger.apply(&[receipt("alice", "bob", 7)]).unwrap();
        // alice now has 3
        let firm = ledger.validate_batch(&[receipt("alice", "bob", 5)]);
        assert!(firm.is_empty());
    }

    #[test]
    fn apply_rejects_unaffordable_receipt_and_leaves_ledger_untouched() {
        let mut ledger = Ledger::new();
        ledger.apply(&[receipt(MINE, "alice", 10)]).unwrap();
        let err = ledger.apply(&[receipt("alice", "bob", 50)]).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance_of("alice"), Balance::Finite(10));
        assert_eq!(ledger.balance_of("bob"), Balance::Finite(0));
    }

    #[test]
    fn apply_conserves_totals() {
        let mut ledger = Ledger::new();
        ledger.apply(&[receipt(MINE, "alice", 10)]).unwrap();
        ledger.apply(&[receipt("alice", "bob", 7)]).unwrap();
        assert_eq!(ledger.balance_of("alice"), Balance::Finite(3));
        assert_eq!(ledger.balance_of("bob"), Balance::Finite(7));
        assert_eq!(ledger.balance_of(MINE), Balance::Infinite);
    }
}
