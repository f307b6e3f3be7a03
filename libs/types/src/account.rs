//! Account and position types with reservation semantics
//!
//! Invariants: `0 ≤ cash_reserved ≤ cash_total` and
//! `0 ≤ qty_reserved ≤ qty_total`. Every mutator validates the would-be
//! state before committing and fails without touching the row otherwise.

use crate::errors::LedgerError;
use crate::ids::{Symbol, UserId};
use crate::numeric::{Cash, Price};
use serde::{Deserialize, Serialize};

/// Cash account for a single user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub cash_total: Cash,
    pub cash_reserved: Cash,
    /// Set when an invariant breach was detected; mutations are refused
    /// until manual review clears the flag
    pub quarantined: bool,
    pub version: u64,
}

impl Account {
    /// Create a new empty account
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            cash_total: Cash::ZERO,
            cash_reserved: Cash::ZERO,
            quarantined: false,
            version: 0,
        }
    }

    /// Cash not held by any open order
    pub fn cash_available(&self) -> Cash {
        self.cash_total.saturating_sub(self.cash_reserved)
    }

    /// Check the account invariant: reserved never exceeds total
    pub fn check_invariant(&self) -> bool {
        self.cash_reserved <= self.cash_total
    }

    /// Reserve cash for an order; requires `cash_available ≥ amount`
    pub fn reserve(&mut self, amount: Cash) -> Result<(), LedgerError> {
        let available = self.cash_available();
        if amount > available {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        self.cash_reserved = self.cash_reserved + amount;
        self.version += 1;
        Ok(())
    }

    /// Release a reservation; requires `cash_reserved ≥ amount`
    pub fn release(&mut self, amount: Cash) -> Result<(), LedgerError> {
        match self.cash_reserved.checked_sub(amount) {
            Some(reserved) => {
                self.cash_reserved = reserved;
                self.version += 1;
                Ok(())
            }
            None => Err(LedgerError::NegativeResult {
                field: "cash_reserved".to_string(),
            }),
        }
    }

    /// Settle a buy fill: both reserved and total drop by `amount`
    pub fn settle_debit(&mut self, amount: Cash) -> Result<(), LedgerError> {
        let reserved = self.cash_reserved.checked_sub(amount);
        let total = self.cash_total.checked_sub(amount);
        match (reserved, total) {
            (Some(reserved), Some(total)) => {
                self.cash_reserved = reserved;
                self.cash_total = total;
                self.version += 1;
                Ok(())
            }
            (None, _) => Err(LedgerError::NegativeResult {
                field: "cash_reserved".to_string(),
            }),
            (_, None) => Err(LedgerError::NegativeResult {
                field: "cash_total".to_string(),
            }),
        }
    }

    /// Settle a sell fill or a deposit: total grows by `amount`
    pub fn credit(&mut self, amount: Cash) {
        self.cash_total = self.cash_total + amount;
        self.version += 1;
    }
}

/// Share position for one (user, symbol)
///
/// Exists only while the user holds or reserves shares; the row is
/// deleted when both totals reach zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub qty_total: u64,
    pub qty_reserved: u64,
    /// Weighted average buy cost per share; updated on buy fills only
    pub avg_cost: Option<Price>,
    pub version: u64,
}

impl Position {
    /// Create a new empty position
    pub fn new(user_id: UserId, symbol: Symbol) -> Self {
        Self {
            user_id,
            symbol,
            qty_total: 0,
            qty_reserved: 0,
            avg_cost: None,
            version: 0,
        }
    }

    /// Shares not held by any open sell order
    pub fn qty_available(&self) -> u64 {
        self.qty_total - self.qty_reserved
    }

    /// Check the position invariant: reserved never exceeds total
    pub fn check_invariant(&self) -> bool {
        self.qty_reserved <= self.qty_total
    }

    /// True when the row carries nothing and may be deleted
    pub fn is_empty(&self) -> bool {
        self.qty_total == 0 && self.qty_reserved == 0
    }

    /// Reserve shares for a sell order; requires `qty_available ≥ qty`
    pub fn reserve(&mut self, qty: u64) -> Result<(), LedgerError> {
        let available = self.qty_available();
        if qty > available {
            return Err(LedgerError::InsufficientShares {
                required: qty,
                available,
            });
        }
        self.qty_reserved += qty;
        self.version += 1;
        Ok(())
    }

    /// Release a reservation; requires `qty_reserved ≥ qty`
    pub fn release(&mut self, qty: u64) -> Result<(), LedgerError> {
        if qty > self.qty_reserved {
            return Err(LedgerError::NegativeResult {
                field: "qty_reserved".to_string(),
            });
        }
        self.qty_reserved -= qty;
        self.version += 1;
        Ok(())
    }

    /// Settle a sell fill: both reserved and total drop by `qty`
    pub fn settle_debit(&mut self, qty: u64) -> Result<(), LedgerError> {
        if qty > self.qty_reserved {
            return Err(LedgerError::NegativeResult {
                field: "qty_reserved".to_string(),
            });
        }
        if qty > self.qty_total {
            return Err(LedgerError::NegativeResult {
                field: "qty_total".to_string(),
            });
        }
        self.qty_reserved -= qty;
        self.qty_total -= qty;
        self.version += 1;
        Ok(())
    }

    /// Settle a buy fill: total grows and the average cost re-weights
    pub fn credit_with_cost(&mut self, qty: u64, price: Price) {
        self.avg_cost = Price::blend(self.avg_cost, self.qty_total, price, qty);
        self.qty_total += qty;
        self.version += 1;
    }

    /// Deposit shares without affecting cost basis weighting rules
    pub fn deposit(&mut self, qty: u64, cost: Option<Price>) {
        if let Some(price) = cost {
            self.avg_cost = Price::blend(self.avg_cost, self.qty_total, price, qty);
        }
        self.qty_total += qty;
        self.version += 1;
    }
}
