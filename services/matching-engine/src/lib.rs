//! Matching engine service
//!
//! Consumes process-order jobs and performs price-time-priority matching
//! against opposing resting orders, settling cash and shares on every fill
//! and sealing the resulting trades into a batch for downstream candle
//! building and broadcasting.
//!
//! The single-writer rule: at most one matching worker runs per symbol.
//! The dispatcher pulls jobs off the order-processing queue and routes
//! them to a per-symbol worker task over a private channel, so fills on
//! one book are totally ordered while distinct symbols match in parallel.

pub mod engine;
pub mod worker;

pub use engine::{MatchConfig, MatchOutcome, MatchingEngine};
pub use worker::MatchWorkers;
