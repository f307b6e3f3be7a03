//! Market statistics
//!
//! Derives the `marketUpdate` payload for one symbol: last price, session
//! OHLC and volume from today's base candles, and change against the prior
//! session's close.

use crate::candles::CandleStore;
use rust_decimal::Decimal;
use types::candle::Period;
use types::events::ExchangeEvent;
use types::ids::Symbol;
use types::numeric::Price;

/// Build a `marketUpdate` event from persisted candles
///
/// `last_trade_price` (the live tape) wins over the last persisted close.
/// Returns None when the symbol has no price history at all.
pub fn market_update(
    store: &CandleStore,
    symbol: &Symbol,
    last_trade_price: Option<Price>,
    now_ms: i64,
) -> Option<ExchangeEvent> {
    let session_start = Period::D1.align(now_ms);
    let session = store.range(
        symbol,
        Period::M1,
        session_start,
        session_start + Period::D1.duration_ms(),
    );

    let last_price = last_trade_price
        .or_else(|| session.last().map(|c| c.close))
        .or_else(|| store.last(symbol, Period::M1).map(|c| c.close))?;

    let (open, high, low, volume) = match session.first() {
        Some(first) => {
            let mut high = first.high;
            let mut low = first.low;
            let mut volume = 0u64;
            for candle in &session {
                if candle.high > high {
                    high = candle.high;
                }
                if candle.low < low {
                    low = candle.low;
                }
                volume += candle.volume;
            }
            (first.open, high, low, volume)
        }
        None => (last_price, last_price, last_price, 0),
    };

    // Change vs. the close of the last candle before this session
    let reference = store
        .last_before(symbol, Period::M1, session_start)
        .map(|c| c.close)
        .unwrap_or(open);
    let change = last_price.as_decimal() - reference.as_decimal();
    let change_percent = if reference.as_decimal().is_zero() {
        Decimal::ZERO
    } else {
        (change / reference.as_decimal() * Decimal::ONE_HUNDRED).round_dp(2)
    };

    Some(ExchangeEvent::MarketUpdate {
        symbol: symbol.clone(),
        last_price,
        open,
        high,
        low,
        volume,
        change,
        change_percent,
        timestamp: now_ms,
    })
}
