//! Cash primitives
//!
//! Reserve / release / settle operations on the cash side of an account.
//! Each runs under the account's row lock: validate, then commit, never
//! partial. The update result is observed before success is reported.

use crate::Ledger;
use tracing::debug;
use types::account::Account;
use types::errors::LedgerError;
use types::ids::UserId;
use types::numeric::Cash;

impl Ledger {
    /// Reserve cash for an order
    ///
    /// Requires `cash_available ≥ amount`; fails with `InsufficientFunds`
    /// otherwise.
    pub fn reserve_cash(&self, user: UserId, amount: Cash) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let mut account = self
            .accounts()
            .entry(user)
            .or_insert_with(|| Account::new(user));
        account.reserve(amount)?;
        debug!(user = %user, amount = %amount, reserved = %account.cash_reserved, "cash reserved");
        Ok(())
    }

    /// Release reserved cash
    ///
    /// Used on cancellation and when finalizing an over-reserved MARKET
    /// buy. Requires `cash_reserved ≥ amount`; a shortfall is an invariant
    /// breach and quarantines the account.
    pub fn release_cash(&self, user: UserId, amount: Cash) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let result = match self.accounts().get_mut(&user) {
            Some(mut account) => account.release(amount),
            None => Err(LedgerError::NegativeResult {
                field: "cash_reserved".to_string(),
            }),
        };
        if let Err(ref err) = result {
            if err.is_invariant_breach() {
                self.quarantine(user, err);
            }
        }
        result
    }

    /// Settle the buyer side of a fill: reserved and total both drop
    pub fn settle_cash_debit(&self, user: UserId, amount: Cash) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let result = match self.accounts().get_mut(&user) {
            Some(mut account) => account.settle_debit(amount),
            None => Err(LedgerError::NegativeResult {
                field: "cash_total".to_string(),
            }),
        };
        if let Err(ref err) = result {
            if err.is_invariant_breach() {
                self.quarantine(user, err);
            }
        }
        result
    }

    /// Settle the seller side of a fill: total grows
    pub fn settle_cash_credit(&self, user: UserId, amount: Cash) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let mut account = self
            .accounts()
            .entry(user)
            .or_insert_with(|| Account::new(user));
        account.credit(amount);
        Ok(())
    }
}
