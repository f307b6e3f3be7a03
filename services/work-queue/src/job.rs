//! Job definitions
//!
//! One payload type per queue: order-processing jobs carry the order to
//! match, trade-processing jobs carry a sealed trade batch, and
//! market-data-update jobs name the symbol whose statistics are stale.

use types::ids::{OrderId, Symbol};
use types::trade::TradeBatch;
use uuid::Uuid;

/// Priority for LIMIT order processing
pub const PRIORITY_NORMAL: i32 = 0;
/// Priority for MARKET order processing (executes first)
pub const PRIORITY_HIGH: i32 = 10;

/// Work item payloads
#[derive(Debug, Clone)]
pub enum JobPayload {
    /// Match one submitted order against the book
    ProcessOrder { order_id: OrderId, symbol: Symbol },
    /// Fold one trade batch into candles and broadcasts
    BatchTrade { batch: TradeBatch },
    /// Recompute and broadcast market statistics for a symbol
    MarketUpdate { symbol: Symbol },
}

impl JobPayload {
    /// Payload label for logging
    pub fn label(&self) -> &'static str {
        match self {
            JobPayload::ProcessOrder { .. } => "process-order",
            JobPayload::BatchTrade { .. } => "batch-trade",
            JobPayload::MarketUpdate { .. } => "market-update",
        }
    }

    /// Symbol the job concerns
    pub fn symbol(&self) -> &Symbol {
        match self {
            JobPayload::ProcessOrder { symbol, .. } => symbol,
            JobPayload::BatchTrade { batch } => &batch.symbol,
            JobPayload::MarketUpdate { symbol } => symbol,
        }
    }
}

/// A queued unit of work
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: Uuid,
    pub payload: JobPayload,
    /// Higher executes first; ties break FIFO
    pub priority: i32,
    /// Delivery attempt, starting at 0
    pub attempt: u32,
    /// Unix millis at first enqueue
    pub enqueued_at: i64,
}

impl Job {
    /// Create a first-attempt job
    pub fn new(payload: JobPayload, priority: i32, enqueued_at: i64) -> Self {
        Self {
            job_id: Uuid::now_v7(),
            payload,
            priority,
            attempt: 0,
            enqueued_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_labels() {
        let job = Job::new(
            JobPayload::MarketUpdate {
                symbol: Symbol::new("ACME"),
            },
            PRIORITY_NORMAL,
            0,
        );
        assert_eq!(job.payload.label(), "market-update");
        assert_eq!(job.attempt, 0);
    }

    #[test]
    fn test_payload_symbol() {
        let payload = JobPayload::ProcessOrder {
            order_id: OrderId::new(),
            symbol: Symbol::new("ACME"),
        };
        assert_eq!(payload.symbol().as_str(), "ACME");
    }
}
