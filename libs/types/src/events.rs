//! Outbound market event payloads
//!
//! Events emitted to subscribers after matching and candle aggregation.
//! `PriceUpdate` and `MarketUpdate` are coalescable per (symbol, kind);
//! `TradeCompleted` and `KlineUpdate` are emitted for every occurrence.

use crate::candle::{Candle, Period};
use crate::ids::{Symbol, TradeId};
use crate::numeric::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Coalescing key kind for debounced updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateKind {
    Price,
    Market,
}

/// Event emitted to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "camelCase")]
pub enum ExchangeEvent {
    /// One matched batch settled; emitted exactly once per batch
    #[serde(rename_all = "camelCase")]
    TradeCompleted {
        symbol: Symbol,
        weighted_avg_price: Price,
        total_volume: u64,
        batch_size: usize,
        first_trade_id: TradeId,
        timestamp: i64,
    },

    /// Latest traded price; coalesced per symbol
    #[serde(rename_all = "camelCase")]
    PriceUpdate {
        symbol: Symbol,
        price: Price,
        volume: u64,
        timestamp: i64,
        trade_id: TradeId,
    },

    /// A base or derived candle opened or changed
    #[serde(rename_all = "camelCase")]
    KlineUpdate {
        period: Period,
        candle: Candle,
        is_new_candle: bool,
    },

    /// Session statistics snapshot; coalesced per symbol
    #[serde(rename_all = "camelCase")]
    MarketUpdate {
        symbol: Symbol,
        last_price: Price,
        open: Price,
        high: Price,
        low: Price,
        volume: u64,
        change: Decimal,
        change_percent: Decimal,
        timestamp: i64,
    },
}

impl ExchangeEvent {
    /// Event type label for logging
    pub fn label(&self) -> &'static str {
        match self {
            ExchangeEvent::TradeCompleted { .. } => "tradeCompleted",
            ExchangeEvent::PriceUpdate { .. } => "priceUpdate",
            ExchangeEvent::KlineUpdate { .. } => "klineUpdate",
            ExchangeEvent::MarketUpdate { .. } => "marketUpdate",
        }
    }

    /// Symbol the event concerns
    pub fn symbol(&self) -> &Symbol {
        match self {
            ExchangeEvent::TradeCompleted { symbol, .. } => symbol,
            ExchangeEvent::PriceUpdate { symbol, .. } => symbol,
            ExchangeEvent::KlineUpdate { candle, .. } => &candle.symbol,
            ExchangeEvent::MarketUpdate { symbol, .. } => symbol,
        }
    }

    /// Coalescing key, if this event kind is debounced
    pub fn coalesce_key(&self) -> Option<(Symbol, UpdateKind)> {
        match self {
            ExchangeEvent::PriceUpdate { symbol, .. } => {
                Some((symbol.clone(), UpdateKind::Price))
            }
            ExchangeEvent::MarketUpdate { symbol, .. } => {
                Some((symbol.clone(), UpdateKind::Market))
            }
            _ => None,
        }
    }
}
