//! Trade and trade-batch types
//!
//! A trade is the append-only record of one fill. Trades produced while
//! matching a single incoming order travel downstream together as one
//! `TradeBatch`, the unit of work for candle building and broadcasting.

use crate::ids::{BatchId, OrderId, Symbol, TradeId, UserId};
use crate::numeric::{Cash, Price};
use serde::{Deserialize, Serialize};

/// Append-only fill record
///
/// Invariant: `buy_user_id != sell_user_id` (self-trade prohibited).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub symbol: Symbol,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buy_user_id: UserId,
    pub sell_user_id: UserId,
    pub price: Price,
    pub quantity: u64,
    /// Unix millis
    pub executed_at: i64,
}

impl Trade {
    /// Create a new trade record
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        buy_user_id: UserId,
        sell_user_id: UserId,
        price: Price,
        quantity: u64,
        executed_at: i64,
    ) -> Self {
        Self {
            id: TradeId::new(),
            symbol,
            buy_order_id,
            sell_order_id,
            buy_user_id,
            sell_user_id,
            price,
            quantity,
            executed_at,
        }
    }

    /// Cash moved by this trade (price × quantity, 2 dp)
    pub fn notional(&self) -> Cash {
        Cash::notional(self.price, self.quantity)
    }

    /// Validate the self-trade prohibition
    pub fn is_self_trade(&self) -> bool {
        self.buy_user_id == self.sell_user_id
    }
}

/// The trades produced by matching one incoming order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeBatch {
    pub batch_id: BatchId,
    pub symbol: Symbol,
    pub trades: Vec<Trade>,
    /// Total shares across the batch
    pub total_volume: u64,
    /// Unix millis when the batch was sealed
    pub timestamp: i64,
}

impl TradeBatch {
    /// Seal a batch from the trades of one matching pass
    ///
    /// # Panics
    /// Panics if `trades` is empty; empty batches are never enqueued
    pub fn new(symbol: Symbol, trades: Vec<Trade>, timestamp: i64) -> Self {
        assert!(!trades.is_empty(), "TradeBatch must contain trades");
        let total_volume = trades.iter().map(|t| t.quantity).sum();
        Self {
            batch_id: BatchId::new(),
            symbol,
            trades,
            total_volume,
            timestamp,
        }
    }

    /// Number of trades in the batch
    pub fn batch_size(&self) -> usize {
        self.trades.len()
    }

    /// Volume-weighted average price across the batch
    pub fn weighted_avg_price(&self) -> Option<Price> {
        let mut avg = None;
        let mut qty_so_far = 0u64;
        for trade in &self.trades {
            avg = Price::blend(avg, qty_so_far, trade.price, trade.quantity);
            qty_so_far += trade.quantity;
        }
        avg
    }

    /// First trade in the batch (execution order)
    pub fn first_trade(&self) -> &Trade {
        &self.trades[0]
    }

    /// Last trade in the batch (execution order)
    pub fn last_trade(&self) -> &Trade {
        &self.trades[self.trades.len() - 1]
    }
}
