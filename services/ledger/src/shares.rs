//! Share primitives
//!
//! Reserve / release / settle operations on positions. Mirrors the cash
//! side, with one extra rule: a position row whose totals both reach zero
//! is deleted.

use crate::Ledger;
use tracing::debug;
use types::account::Position;
use types::errors::LedgerError;
use types::ids::{Symbol, UserId};
use types::numeric::Price;

impl Ledger {
    /// Reserve shares for a sell order
    ///
    /// Requires `qty_available ≥ qty`; fails with `InsufficientShares`
    /// otherwise.
    pub fn reserve_shares(
        &self,
        user: UserId,
        symbol: &Symbol,
        qty: u64,
    ) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let result = match self.positions().get_mut(&(user, symbol.clone())) {
            Some(mut position) => position.reserve(qty),
            None => Err(LedgerError::InsufficientShares {
                required: qty,
                available: 0,
            }),
        };
        if result.is_ok() {
            debug!(user = %user, symbol = %symbol, qty, "shares reserved");
        }
        result
    }

    /// Release reserved shares
    ///
    /// Used on cancellation. A shortfall is an invariant breach and
    /// quarantines the account.
    pub fn release_shares(
        &self,
        user: UserId,
        symbol: &Symbol,
        qty: u64,
    ) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let result = match self.positions().get_mut(&(user, symbol.clone())) {
            Some(mut position) => position.release(qty),
            None => Err(LedgerError::NegativeResult {
                field: "qty_reserved".to_string(),
            }),
        };
        if let Err(ref err) = result {
            if err.is_invariant_breach() {
                self.quarantine(user, err);
            }
        }
        result
    }

    /// Settle the seller side of a fill: reserved and total both drop
    ///
    /// Deletes the row when both totals reach zero.
    pub fn settle_share_debit(
        &self,
        user: UserId,
        symbol: &Symbol,
        qty: u64,
    ) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let key = (user, symbol.clone());
        let result = match self.positions().get_mut(&key) {
            Some(mut position) => position.settle_debit(qty),
            None => Err(LedgerError::NegativeResult {
                field: "qty_total".to_string(),
            }),
        };
        match result {
            Ok(()) => {
                self.positions().remove_if(&key, |_, p| p.is_empty());
                Ok(())
            }
            Err(err) => {
                if err.is_invariant_breach() {
                    self.quarantine(user, &err);
                }
                Err(err)
            }
        }
    }

    /// Settle the buyer side of a fill: total grows and the weighted
    /// average cost re-weights with the new lot
    pub fn settle_share_credit_with_cost(
        &self,
        user: UserId,
        symbol: &Symbol,
        qty: u64,
        price: Price,
    ) -> Result<(), LedgerError> {
        self.check_quarantine(user)?;
        let mut position = self
            .positions()
            .entry((user, symbol.clone()))
            .or_insert_with(|| Position::new(user, symbol.clone()));
        position.credit_with_cost(qty, price);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(ledger: &Ledger, symbol: &Symbol, qty: u64) -> UserId {
        let user = UserId::new();
        ledger.deposit_shares(user, symbol, qty, None).unwrap();
        user
    }

    #[test]
    fn test_reserve_then_settle() {
        let ledger = Ledger::new();
        let symbol = Symbol::new("ACME");
        let user = holding(&ledger, &symbol, 10);

        ledger.reserve_shares(user, &symbol, 4).unwrap();
        ledger.settle_share_debit(user, &symbol, 4).unwrap();

        let position = ledger.get_position(user, &symbol).unwrap();
        assert_eq!(position.qty_total, 6);
        assert_eq!(position.qty_reserved, 0);
        assert!(position.check_invariant());
    }

    #[test]
    fn test_reserve_insufficient() {
        let ledger = Ledger::new();
        let symbol = Symbol::new("ACME");
        let user = holding(&ledger, &symbol, 3);

        let err = ledger.reserve_shares(user, &symbol, 5).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientShares {
                required: 5,
                available: 3,
            }
        );
    }

    #[test]
    fn test_reserve_without_position() {
        let ledger = Ledger::new();
        let err = ledger
            .reserve_shares(UserId::new(), &Symbol::new("ACME"), 1)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientShares {
                required: 1,
                available: 0,
            }
        );
    }

    #[test]
    fn test_full_settle_deletes_row() {
        let ledger = Ledger::new();
        let symbol = Symbol::new("ACME");
        let user = holding(&ledger, &symbol, 5);

        ledger.reserve_shares(user, &symbol, 5).unwrap();
        ledger.settle_share_debit(user, &symbol, 5).unwrap();

        assert!(ledger.get_position(user, &symbol).is_none());
    }

    #[test]
    fn test_release_past_reservation_quarantines() {
        let ledger = Ledger::new();
        let symbol = Symbol::new("ACME");
        let user = holding(&ledger, &symbol, 5);
        ledger.reserve_shares(user, &symbol, 2).unwrap();

        let err = ledger.release_shares(user, &symbol, 3).unwrap_err();
        assert!(err.is_invariant_breach());
        assert!(ledger.is_quarantined(user));
    }

    #[test]
    fn test_credit_with_cost_weights_basis() {
        let ledger = Ledger::new();
        let symbol = Symbol::new("ACME");
        let user = UserId::new();

        ledger
            .settle_share_credit_with_cost(user, &symbol, 10, Price::from_u64(100))
            .unwrap();
        ledger
            .settle_share_credit_with_cost(user, &symbol, 30, Price::from_u64(200))
            .unwrap();

        let position = ledger.get_position(user, &symbol).unwrap();
        assert_eq!(position.qty_total, 40);
        // (10×100 + 30×200) / 40 = 175
        assert_eq!(position.avg_cost, Some(Price::from_u64(175)));
    }

    #[test]
    fn test_settle_debit_only_from_reserved() {
        let ledger = Ledger::new();
        let symbol = Symbol::new("ACME");
        let user = holding(&ledger, &symbol, 10);
        // Nothing reserved: settle must fail, not dip into available
        let err = ledger.settle_share_debit(user, &symbol, 1).unwrap_err();
        assert!(err.is_invariant_breach());
    }
}
