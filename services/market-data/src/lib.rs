//! Market data service
//!
//! Consumes trade batches from the matching engine and produces:
//! - 1-minute base candles per symbol, with higher-period aggregates
//!   (5m/15m/1h/1d) re-derived from the affected base range
//! - Gap-filled flat candles for tradeless minutes
//! - `tradeCompleted`, `priceUpdate`, `klineUpdate`, and `marketUpdate`
//!   events, the latter two debounced per (symbol, kind)
//!
//! # Pipeline
//!
//! ```text
//! trade-processing queue ──► CandleService ──► klineUpdate / tradeCompleted
//!         │                        │
//!         │                        └──► market-data-update queue
//!         │                                     │
//!         └── priceUpdate ──► Broadcaster ◄── marketUpdate
//!                                  │
//!                              EventSink
//! ```

pub mod broadcast;
pub mod candles;
pub mod stats;
pub mod worker;

pub use broadcast::{BroadcastConfig, BroadcastSink, Broadcaster, EventSink};
pub use candles::{CandleConfig, CandleService, CandleStore};
pub use worker::MarketDataWorker;
