//! Order lifecycle types
//!
//! An order is immutable identity (who, what, how much) plus mutable fill
//! state. Reservation accounting rides on the order: `reserved_cash` is set
//! once at submission, `consumed_cash` accumulates across fills, and the
//! difference is what cancellation or finalization must release.

use crate::errors::OrderError;
use crate::ids::{OrderId, Symbol, UserId};
use crate::numeric::{Cash, Price};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order method: price-limited or execute-at-market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderMethod {
    /// Execute at `limit_price` or better; residual rests on the book
    Limit,
    /// Execute against best available prices; residual cancels immediately
    Market,
}

/// Order status
///
/// `Pending` → `Open` → (`PartiallyFilled`) → `Filled` | `Cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, reservation held, awaiting the matching worker
    Pending,
    /// Picked up by matching; resting if LIMIT with no fills yet
    Open,
    /// Some quantity filled, remainder live
    PartiallyFilled,
    /// Completely filled (terminal)
    Filled,
    /// Cancelled by user or by MARKET finalization (terminal)
    Cancelled,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// Check if an order in this status may receive fills
    pub fn is_fillable(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    /// Status label for logging
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Complete order structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub method: OrderMethod,
    /// Present iff method is LIMIT
    pub limit_price: Option<Price>,
    pub quantity: u64,
    pub filled_qty: u64,
    /// Quantity-weighted average fill price; None until first fill
    pub avg_fill_price: Option<Price>,
    /// Cash reserved at submission (BUY only; zero for SELL)
    pub reserved_cash: Cash,
    /// Cash actually spent across fills (BUY only)
    pub consumed_cash: Cash,
    pub status: OrderStatus,
    /// Unix millis; tiebreak for time priority
    pub created_at: i64,
    pub updated_at: i64,
    pub version: u64,
}

impl Order {
    /// Create a new pending order
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        symbol: Symbol,
        side: Side,
        method: OrderMethod,
        limit_price: Option<Price>,
        quantity: u64,
        reserved_cash: Cash,
        timestamp: i64,
    ) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            symbol,
            side,
            method,
            limit_price,
            quantity,
            filled_qty: 0,
            avg_fill_price: None,
            reserved_cash,
            consumed_cash: Cash::ZERO,
            status: OrderStatus::Pending,
            created_at: timestamp,
            updated_at: timestamp,
            version: 0,
        }
    }

    /// Unfilled quantity
    pub fn remaining_qty(&self) -> u64 {
        self.quantity - self.filled_qty
    }

    /// Check if order is completely filled
    pub fn is_filled(&self) -> bool {
        self.filled_qty == self.quantity
    }

    /// Reserved cash not yet consumed by fills
    pub fn residual_cash(&self) -> Cash {
        self.reserved_cash.saturating_sub(self.consumed_cash)
    }

    /// Record a fill against this order
    ///
    /// Updates filled quantity, the quantity-weighted average fill price,
    /// consumed cash (buyer side passes the spent amount, seller side
    /// passes zero), and advances status. Fails if the order is not in a
    /// fillable state or the fill would exceed the order quantity.
    pub fn record_fill(
        &mut self,
        qty: u64,
        price: Price,
        cash_spent: Cash,
        timestamp: i64,
    ) -> Result<(), OrderError> {
        if !self.status.is_fillable() {
            return Err(OrderError::NotFillable {
                order_id: self.id.to_string(),
                status: self.status.label().to_string(),
            });
        }
        if qty == 0 || self.filled_qty + qty > self.quantity {
            return Err(OrderError::FillExceedsQuantity {
                order_id: self.id.to_string(),
                fill: qty,
                remaining: self.remaining_qty(),
            });
        }

        self.avg_fill_price = Price::blend(self.avg_fill_price, self.filled_qty, price, qty);
        self.filled_qty += qty;
        self.consumed_cash = self.consumed_cash + cash_spent;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = timestamp;
        self.version += 1;
        Ok(())
    }

    /// Transition the status if the current status is in `allowed_from`
    pub fn transition(
        &mut self,
        allowed_from: &[OrderStatus],
        to: OrderStatus,
        timestamp: i64,
    ) -> Result<(), OrderError> {
        if !allowed_from.contains(&self.status) {
            return Err(OrderError::InvalidTransition {
                order_id: self.id.to_string(),
                from: self.status.label().to_string(),
                to: to.label().to_string(),
            });
        }
        self.status = to;
        self.updated_at = timestamp;
        self.version += 1;
        Ok(())
    }
}
