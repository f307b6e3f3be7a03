//! OHLCV candle types and period arithmetic
//!
//! The 1-minute candle is the base record; higher periods are derived by
//! aggregation over contiguous base candles. Candle boundaries are aligned
//! to epoch (a 5m candle opens on a 5-minute boundary).

use crate::ids::Symbol;
use crate::numeric::Price;
use serde::{Deserialize, Serialize};

/// Supported candle periods (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    /// 1 minute (base)
    #[serde(rename = "1m")]
    M1,
    /// 5 minutes
    #[serde(rename = "5m")]
    M5,
    /// 15 minutes
    #[serde(rename = "15m")]
    M15,
    /// 1 hour
    #[serde(rename = "1h")]
    H1,
    /// 1 day
    #[serde(rename = "1d")]
    D1,
}

impl Period {
    /// Duration of this period in milliseconds
    pub fn duration_ms(&self) -> i64 {
        match self {
            Period::M1 => 60_000,
            Period::M5 => 5 * 60_000,
            Period::M15 => 15 * 60_000,
            Period::H1 => 3_600_000,
            Period::D1 => 86_400_000,
        }
    }

    /// All supported periods
    pub fn all() -> &'static [Period] {
        &[Period::M1, Period::M5, Period::M15, Period::H1, Period::D1]
    }

    /// The derived periods (everything above the 1-minute base)
    pub fn derived() -> &'static [Period] {
        &[Period::M5, Period::M15, Period::H1, Period::D1]
    }

    /// Align a Unix-millis timestamp to this period's boundary (floor)
    pub fn align(&self, timestamp_ms: i64) -> i64 {
        let duration = self.duration_ms();
        (timestamp_ms / duration) * duration
    }

    /// Period label for logging
    pub fn label(&self) -> &'static str {
        match self {
            Period::M1 => "1m",
            Period::M5 => "5m",
            Period::M15 => "15m",
            Period::H1 => "1h",
            Period::D1 => "1d",
        }
    }

    /// Parse a period label
    pub fn parse(s: &str) -> Option<Period> {
        match s {
            "1m" => Some(Period::M1),
            "5m" => Some(Period::M5),
            "15m" => Some(Period::M15),
            "1h" => Some(Period::H1),
            "1d" => Some(Period::D1),
            _ => None,
        }
    }
}

/// A single OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub period: Period,
    /// Period start, Unix millis, aligned to the period boundary
    pub open_time: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    /// Total shares traded in the period
    pub volume: u64,
}

impl Candle {
    /// Open a candle from the first trade in its period
    pub fn open_with(symbol: Symbol, period: Period, open_time: i64, price: Price, qty: u64) -> Self {
        Self {
            symbol,
            period,
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: qty,
        }
    }

    /// Flat (no-trade) candle used for gap filling
    pub fn flat(symbol: Symbol, period: Period, open_time: i64, prev_close: Price) -> Self {
        Self {
            symbol,
            period,
            open_time,
            open: prev_close,
            high: prev_close,
            low: prev_close,
            close: prev_close,
            volume: 0,
        }
    }

    /// Fold another trade into the candle
    pub fn update(&mut self, price: Price, qty: u64) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += qty;
    }

    /// Aggregate contiguous base candles into one candle of `period`
    ///
    /// Open is the first base open, close the last base close, high/low the
    /// extremes, volume the sum. Returns None for an empty range. The input
    /// must be in chronological order.
    pub fn aggregate(period: Period, period_start: i64, bases: &[Candle]) -> Option<Candle> {
        let first = bases.first()?;
        let last = bases.last()?;

        let mut high = first.high;
        let mut low = first.low;
        let mut volume = 0u64;
        for base in bases {
            if base.high > high {
                high = base.high;
            }
            if base.low < low {
                low = base.low;
            }
            volume += base.volume;
        }

        Some(Candle {
            symbol: first.symbol.clone(),
            period,
            open_time: period_start,
            open: first.open,
            high,
            low,
            close: last.close,
            volume,
        })
    }

    /// Validate OHLC consistency
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
    }
}
