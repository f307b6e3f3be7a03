//! Work queue service
//!
//! Three named queues connect the pipeline: `order-processing` feeds the
//! matching workers, `trade-processing` feeds candle building, and
//! `market-data-update` feeds statistics broadcasting. Delivery is
//! at-least-once, so every consumer is idempotent; retries are bounded
//! with exponential backoff and exhausted jobs are kept for inspection.

pub mod job;
pub mod queue;

pub use job::{Job, JobPayload, PRIORITY_HIGH, PRIORITY_NORMAL};
pub use queue::{FailedJob, JobQueue, QueueStats, RetryConfig};

use std::sync::Arc;

/// Name of the order-processing queue
pub const QUEUE_ORDER_PROCESSING: &str = "order-processing";
/// Name of the trade-processing queue
pub const QUEUE_TRADE_PROCESSING: &str = "trade-processing";
/// Name of the market-data-update queue
pub const QUEUE_MARKET_DATA: &str = "market-data-update";

/// The three pipeline queues
pub struct WorkQueues {
    pub order_processing: JobQueue,
    pub trade_processing: JobQueue,
    pub market_data: JobQueue,
}

impl WorkQueues {
    /// Create all queues with one shared retry policy
    pub fn new(retry: RetryConfig) -> Arc<Self> {
        Arc::new(Self {
            order_processing: JobQueue::new(QUEUE_ORDER_PROCESSING, retry.clone()),
            trade_processing: JobQueue::new(QUEUE_TRADE_PROCESSING, retry.clone()),
            market_data: JobQueue::new(QUEUE_MARKET_DATA, retry),
        })
    }

    /// Close every queue; consumers drain and stop
    pub fn close_all(&self) {
        self.order_processing.close();
        self.trade_processing.close();
        self.market_data.close();
    }
}
