//! Account ledger service
//!
//! The ledger is a leaf: it depends on nothing but the shared types, and
//! every higher component (submission, matching, cancellation) consumes it
//! through its primitives. All primitives are atomic per row and
//! failure-returning, never partial: the would-be state is validated under
//! the row lock and a write that would produce a negative field is
//! rejected with the row untouched.
//!
//! A `NegativeResult` outside the reservation path means a caller bug; the
//! affected account is quarantined (mutations refused until manual review)
//! rather than taking the whole service down.

mod cash;
mod shares;

use dashmap::DashMap;
use tracing::{error, info};
use types::account::{Account, Position};
use types::errors::LedgerError;
use types::ids::{Symbol, UserId};
use types::numeric::{Cash, Price};

/// Key for the position table
pub type PositionKey = (UserId, Symbol);

/// Account ledger with per-row atomic conditional updates
pub struct Ledger {
    accounts: DashMap<UserId, Account>,
    positions: DashMap<PositionKey, Position>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            positions: DashMap::new(),
        }
    }

    // ── Funding (explicit deposits; accounts created on first use) ──

    /// Credit cash into an account, creating it if absent
    pub fn deposit_cash(&self, user: UserId, amount: Cash) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let mut account = self
            .accounts
            .entry(user)
            .or_insert_with(|| Account::new(user));
        account.credit(amount);
        Ok(())
    }

    /// Credit shares into a position, creating it if absent
    pub fn deposit_shares(
        &self,
        user: UserId,
        symbol: &Symbol,
        qty: u64,
        cost: Option<Price>,
    ) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let mut position = self
            .positions
            .entry((user, symbol.clone()))
            .or_insert_with(|| Position::new(user, symbol.clone()));
        position.deposit(qty, cost);
        Ok(())
    }

    // ── Read snapshots ──────────────────────────────────────────────

    /// Snapshot of an account, if it exists
    pub fn get_account(&self, user: UserId) -> Option<Account> {
        self.accounts.get(&user).map(|a| a.clone())
    }

    /// Cash not held by any open order (zero for unknown accounts)
    pub fn cash_available(&self, user: UserId) -> Cash {
        self.accounts
            .get(&user)
            .map(|a| a.cash_available())
            .unwrap_or(Cash::ZERO)
    }

    /// Snapshot of one position, if it exists
    pub fn get_position(&self, user: UserId, symbol: &Symbol) -> Option<Position> {
        self.positions.get(&(user, symbol.clone())).map(|p| p.clone())
    }

    /// All positions held by a user
    pub fn positions_for(&self, user: UserId) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .filter(|entry| entry.key().0 == user)
            .map(|entry| entry.value().clone())
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    /// Shares currently reserved on one position
    pub fn shares_reserved(&self, user: UserId, symbol: &Symbol) -> u64 {
        self.positions
            .get(&(user, symbol.clone()))
            .map(|p| p.qty_reserved)
            .unwrap_or(0)
    }

    // ── Conservation checks (used by property tests and audits) ─────

    /// Sum of `cash_total` over all accounts
    pub fn total_cash(&self) -> Cash {
        self.accounts
            .iter()
            .fold(Cash::ZERO, |acc, entry| acc + entry.value().cash_total)
    }

    /// Sum of `qty_total` over all positions of one symbol
    pub fn total_shares(&self, symbol: &Symbol) -> u64 {
        self.positions
            .iter()
            .filter(|entry| &entry.key().1 == symbol)
            .map(|entry| entry.value().qty_total)
            .sum()
    }

    // ── Quarantine ──────────────────────────────────────────────────

    /// Whether the account is quarantined
    pub fn is_quarantined(&self, user: UserId) -> bool {
        self.accounts
            .get(&user)
            .map(|a| a.quarantined)
            .unwrap_or(false)
    }

    /// Clear the quarantine flag after manual review
    pub fn release_quarantine(&self, user: UserId) {
        if let Some(mut account) = self.accounts.get_mut(&user) {
            account.quarantined = false;
            account.version += 1;
            info!(user = %user, "quarantine released");
        }
    }

    /// Refuse mutations on a quarantined account
    pub(crate) fn check_quarantine(&self, user: UserId) -> Result<(), LedgerError> {
        if self.is_quarantined(user) {
            return Err(LedgerError::AccountQuarantined {
                user: user.to_string(),
            });
        }
        Ok(())
    }

    /// Quarantine an account on a detected invariant breach
    pub(crate) fn quarantine(&self, user: UserId, err: &LedgerError) {
        error!(user = %user, error = %err, "invariant breach detected — quarantining account");
        let mut account = self
            .accounts
            .entry(user)
            .or_insert_with(|| Account::new(user));
        account.quarantined = true;
        account.version += 1;
    }

    pub(crate) fn accounts(&self) -> &DashMap<UserId, Account> {
        &self.accounts
    }

    pub(crate) fn positions(&self) -> &DashMap<PositionKey, Position> {
        &self.positions
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_creates_account() {
        let ledger = Ledger::new();
        let user = UserId::new();

        ledger.deposit_cash(user, Cash::from_u64(1000)).unwrap();

        let account = ledger.get_account(user).unwrap();
        assert_eq!(account.cash_total, Cash::from_u64(1000));
        assert_eq!(account.cash_reserved, Cash::ZERO);
    }

    #[test]
    fn test_deposit_shares_creates_position() {
        let ledger = Ledger::new();
        let user = UserId::new();
        let symbol = Symbol::new("ACME");

        ledger.deposit_shares(user, &symbol, 10, None).unwrap();

        let position = ledger.get_position(user, &symbol).unwrap();
        assert_eq!(position.qty_total, 10);
        assert_eq!(position.qty_available(), 10);
    }

    #[test]
    fn test_positions_for_sorted_by_symbol() {
        let ledger = Ledger::new();
        let user = UserId::new();
        ledger
            .deposit_shares(user, &Symbol::new("ZETA"), 1, None)
            .unwrap();
        ledger
            .deposit_shares(user, &Symbol::new("ACME"), 2, None)
            .unwrap();

        let positions = ledger.positions_for(user);
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].symbol, Symbol::new("ACME"));
        assert_eq!(positions[1].symbol, Symbol::new("ZETA"));
    }

    #[test]
    fn test_unknown_account_reads() {
        let ledger = Ledger::new();
        let user = UserId::new();

        assert!(ledger.get_account(user).is_none());
        assert_eq!(ledger.cash_available(user), Cash::ZERO);
        assert_eq!(ledger.shares_reserved(user, &Symbol::new("ACME")), 0);
        assert!(!ledger.is_quarantined(user));
    }

    #[test]
    fn test_quarantine_blocks_mutations() {
        let ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit_cash(user, Cash::from_u64(100)).unwrap();

        ledger.quarantine(
            user,
            &LedgerError::NegativeResult {
                field: "cash_total".to_string(),
            },
        );

        let err = ledger.deposit_cash(user, Cash::from_u64(1)).unwrap_err();
        assert!(matches!(err, LedgerError::AccountQuarantined { .. }));

        ledger.release_quarantine(user);
        ledger.deposit_cash(user, Cash::from_u64(1)).unwrap();
    }

    #[test]
    fn test_conservation_helpers() {
        let ledger = Ledger::new();
        let symbol = Symbol::new("ACME");
        let u1 = UserId::new();
        let u2 = UserId::new();

        ledger.deposit_cash(u1, Cash::from_u64(600)).unwrap();
        ledger.deposit_cash(u2, Cash::from_u64(400)).unwrap();
        ledger.deposit_shares(u1, &symbol, 3, None).unwrap();
        ledger.deposit_shares(u2, &symbol, 7, None).unwrap();

        assert_eq!(ledger.total_cash(), Cash::from_u64(1000));
        assert_eq!(ledger.total_shares(&symbol), 10);
    }
}
