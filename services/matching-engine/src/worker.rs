//! Matching workers
//!
//! The dispatcher pulls process-order jobs and routes each to its symbol's
//! worker task over a private channel. One worker per symbol gives the
//! single-writer property: fills on one book are totally ordered, while
//! distinct symbols match concurrently.

use crate::engine::MatchingEngine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use types::ids::Symbol;
use work_queue::{Job, JobPayload, JobQueue, WorkQueues};

/// Dispatcher and per-symbol worker pool
pub struct MatchWorkers {
    engine: Arc<MatchingEngine>,
    queues: Arc<WorkQueues>,
    senders: Mutex<HashMap<Symbol, mpsc::UnboundedSender<Job>>>,
}

impl MatchWorkers {
    pub fn new(engine: Arc<MatchingEngine>, queues: Arc<WorkQueues>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            queues,
            senders: Mutex::new(HashMap::new()),
        })
    }

    /// Run the dispatcher until the order-processing queue closes
    ///
    /// Workers are spawned lazily per symbol and end when the dispatcher
    /// drops their channel senders on shutdown.
    pub async fn run(self: Arc<Self>) {
        info!("matching dispatcher started");
        while let Some(job) = self.queues.order_processing.dequeue().await {
            let symbol = job.payload.symbol().clone();
            let sender = self.worker_for(&symbol);
            if sender.send(job.clone()).is_err() {
                // Worker died; drop its sender so the retry respawns it
                warn!(symbol = %symbol, "matching worker channel closed — requeueing job");
                self.senders.lock().remove(&symbol);
                self.queues
                    .order_processing
                    .fail(job, "matching worker channel closed");
            }
        }
        // Closing the senders ends every worker loop
        self.senders.lock().clear();
        info!("matching dispatcher stopped");
    }

    fn worker_for(&self, symbol: &Symbol) -> mpsc::UnboundedSender<Job> {
        let mut senders = self.senders.lock();
        if let Some(sender) = senders.get(symbol) {
            return sender.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        senders.insert(symbol.clone(), tx.clone());
        let engine = Arc::clone(&self.engine);
        let queue = self.queues.order_processing.clone();
        let symbol = symbol.clone();
        tokio::spawn(async move {
            debug!(symbol = %symbol, "matching worker started");
            worker_loop(engine, queue, rx).await;
            debug!(symbol = %symbol, "matching worker stopped");
        });
        tx
    }
}

/// Sequential matching loop for one symbol
async fn worker_loop(
    engine: Arc<MatchingEngine>,
    queue: JobQueue,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = rx.recv().await {
        let order_id = match &job.payload {
            JobPayload::ProcessOrder { order_id, .. } => *order_id,
            _ => {
                // Misrouted job; acknowledge and move on
                queue.complete(&job);
                continue;
            }
        };

        let deadline = engine.config().txn_timeout;
        match timeout(deadline, engine.process_order_with_retry(order_id)).await {
            Ok(Ok(_)) => queue.complete(&job),
            Ok(Err(err)) => {
                warn!(order_id = %order_id, error = %err, "matching failed");
                queue.fail(job, err.to_string());
            }
            Err(_) => {
                warn!(order_id = %order_id, timeout_ms = deadline.as_millis() as u64, "matching timed out");
                queue.fail(job, "matching transaction timed out");
            }
        }
    }
}
