//! Priority job queue
//!
//! Higher priority executes first; equal priorities drain FIFO by a global
//! enqueue sequence. Delivery is at-least-once: a consumer pulls a job and
//! must `complete` or `fail` it. Failures re-enqueue with exponential
//! backoff up to the attempt limit, then land in the failed partition for
//! manual inspection.
//!
//! `JobQueue` is a cheap cloneable handle over shared state, so retry
//! timers and consumers on other tasks all talk to the same queue.

use crate::job::Job;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};
use types::errors::QueueError;
use types::time::now_millis;

/// Retry policy shared by all queues
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per job before it moves to the failed partition
    pub max_attempts: u32,
    /// First backoff delay
    pub backoff_base: Duration,
    /// Multiplier applied per subsequent attempt
    pub backoff_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_factor: 2,
        }
    }
}

impl RetryConfig {
    /// Backoff before re-delivering attempt `attempt` (1-based retries)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base * self.backoff_factor.saturating_pow(attempt.saturating_sub(1))
    }
}

/// A job that exhausted its retries
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub job: Job,
    pub error: String,
    pub failed_at: i64,
}

/// Heap entry ordered by (priority desc, enqueue sequence asc)
struct QueuedJob {
    priority: i32,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence (FIFO)
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Queue throughput counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub depth: usize,
}

struct QueueState {
    name: &'static str,
    heap: Mutex<BinaryHeap<QueuedJob>>,
    notify: Notify,
    seq: AtomicU64,
    paused: AtomicBool,
    closed: AtomicBool,
    failed: Mutex<Vec<FailedJob>>,
    retry: RetryConfig,
    enqueued: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    failed_count: AtomicU64,
}

/// Handle to one named priority queue
#[derive(Clone)]
pub struct JobQueue {
    state: Arc<QueueState>,
}

impl JobQueue {
    /// Create a named queue with the given retry policy
    pub fn new(name: &'static str, retry: RetryConfig) -> Self {
        Self {
            state: Arc::new(QueueState {
                name,
                heap: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
                paused: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                failed: Mutex::new(Vec::new()),
                retry,
                enqueued: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                retried: AtomicU64::new(0),
                failed_count: AtomicU64::new(0),
            }),
        }
    }

    /// Queue name
    pub fn name(&self) -> &'static str {
        self.state.name
    }

    /// Push a job
    pub fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let state = &self.state;
        if state.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed {
                name: state.name.to_string(),
            });
        }
        let seq = state.seq.fetch_add(1, Ordering::Relaxed);
        debug!(
            queue = state.name,
            job = job.payload.label(),
            priority = job.priority,
            attempt = job.attempt,
            "job enqueued"
        );
        state.heap.lock().push(QueuedJob {
            priority: job.priority,
            seq,
            job,
        });
        state.enqueued.fetch_add(1, Ordering::Relaxed);
        state.notify.notify_one();
        Ok(())
    }

    /// Pull the next job, waiting until one is available
    ///
    /// Returns None once the queue is closed and nothing is poppable.
    pub async fn dequeue(&self) -> Option<Job> {
        let state = &self.state;
        loop {
            let notified = state.notify.notified();
            if !state.paused.load(Ordering::Acquire) {
                if let Some(entry) = state.heap.lock().pop() {
                    return Some(entry.job);
                }
            }
            if state.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Acknowledge successful processing
    pub fn complete(&self, job: &Job) {
        self.state.completed.fetch_add(1, Ordering::Relaxed);
        debug!(
            queue = self.state.name,
            job = job.payload.label(),
            "job completed"
        );
    }

    /// Report failed processing
    ///
    /// Re-enqueues with exponential backoff while attempts remain, else
    /// moves the job to the failed partition.
    pub fn fail(&self, mut job: Job, error: impl Into<String>) {
        let error = error.into();
        job.attempt += 1;

        if job.attempt < self.state.retry.max_attempts {
            let backoff = self.state.retry.backoff_for(job.attempt);
            self.state.retried.fetch_add(1, Ordering::Relaxed);
            warn!(
                queue = self.state.name,
                job = job.payload.label(),
                attempt = job.attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "job failed — retrying with backoff"
            );
            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                // A closed queue drops the retry; workers are gone anyway
                let _ = queue.enqueue(job);
            });
        } else {
            self.state.failed_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                queue = self.state.name,
                job = job.payload.label(),
                attempts = job.attempt,
                error = %error,
                "job exhausted retries — moved to failed partition"
            );
            self.state.failed.lock().push(FailedJob {
                job,
                error,
                failed_at: now_millis(),
            });
        }
    }

    /// Stop delivering jobs until `resume`
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Release);
    }

    /// Resume delivery
    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Whether the queue is paused
    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    /// Drop all queued jobs; returns how many were dropped
    pub fn clean(&self) -> usize {
        let mut heap = self.state.heap.lock();
        let dropped = heap.len();
        heap.clear();
        dropped
    }

    /// Close the queue: consumers drain what is left, then get None
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Jobs waiting for delivery
    pub fn depth(&self) -> usize {
        self.state.heap.lock().len()
    }

    /// Snapshot of the failed partition
    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        self.state.failed.lock().clone()
    }

    /// Throughput counters
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.state.enqueued.load(Ordering::Relaxed),
            completed: self.state.completed.load(Ordering::Relaxed),
            retried: self.state.retried.load(Ordering::Relaxed),
            failed: self.state.failed_count.load(Ordering::Relaxed),
            depth: self.depth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPayload, PRIORITY_HIGH, PRIORITY_NORMAL};
    use types::ids::{OrderId, Symbol};

    fn make_job(priority: i32) -> Job {
        Job::new(
            JobPayload::ProcessOrder {
                order_id: OrderId::new(),
                symbol: Symbol::new("ACME"),
            },
            priority,
            0,
        )
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = JobQueue::new("test", RetryConfig::default());

        let normal = make_job(PRIORITY_NORMAL);
        let high = make_job(PRIORITY_HIGH);
        queue.enqueue(normal.clone()).unwrap();
        queue.enqueue(high.clone()).unwrap();

        assert_eq!(queue.dequeue().await.unwrap().job_id, high.job_id);
        assert_eq!(queue.dequeue().await.unwrap().job_id, normal.job_id);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = JobQueue::new("test", RetryConfig::default());

        let first = make_job(PRIORITY_NORMAL);
        let second = make_job(PRIORITY_NORMAL);
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(second.clone()).unwrap();

        assert_eq!(queue.dequeue().await.unwrap().job_id, first.job_id);
        assert_eq!(queue.dequeue().await.unwrap().job_id, second.job_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = JobQueue::new("test", RetryConfig::default());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let job = make_job(PRIORITY_NORMAL);
        queue.enqueue(job.clone()).unwrap();

        let delivered = consumer.await.unwrap().unwrap();
        assert_eq!(delivered.job_id, job.job_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_retries_with_backoff() {
        let queue = JobQueue::new("test", RetryConfig::default());
        let job = make_job(PRIORITY_NORMAL);
        queue.enqueue(job.clone()).unwrap();

        let delivered = queue.dequeue().await.unwrap();
        queue.fail(delivered, "transient");

        // Redelivered after the 100 ms base backoff
        let redelivered = queue.dequeue().await.unwrap();
        assert_eq!(redelivered.job_id, job.job_id);
        assert_eq!(redelivered.attempt, 1);
        assert_eq!(queue.stats().retried, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_move_to_failed_partition() {
        let queue = JobQueue::new("test", RetryConfig::default());
        queue.enqueue(make_job(PRIORITY_NORMAL)).unwrap();

        for _ in 0..3 {
            let job = queue.dequeue().await.unwrap();
            queue.fail(job, "persistent");
        }

        assert_eq!(queue.depth(), 0);
        let failed = queue.failed_jobs();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error, "persistent");
        assert_eq!(failed[0].job.attempt, 3);
        assert_eq!(queue.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume() {
        let queue = JobQueue::new("test", RetryConfig::default());
        queue.enqueue(make_job(PRIORITY_NORMAL)).unwrap();
        queue.pause();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!consumer.is_finished(), "paused queue must not deliver");

        queue.resume();
        assert!(consumer.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clean_drops_jobs() {
        let queue = JobQueue::new("test", RetryConfig::default());
        queue.enqueue(make_job(PRIORITY_NORMAL)).unwrap();
        queue.enqueue(make_job(PRIORITY_NORMAL)).unwrap();

        assert_eq!(queue.clean(), 2);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = JobQueue::new("test", RetryConfig::default());
        queue.enqueue(make_job(PRIORITY_NORMAL)).unwrap();
        queue.close();

        // Remaining work is drained first
        assert!(queue.dequeue().await.is_some());
        // Then the stream ends
        assert!(queue.dequeue().await.is_none());

        // New work is refused
        let err = queue.enqueue(make_job(PRIORITY_NORMAL)).unwrap_err();
        assert!(matches!(err, QueueError::Closed { .. }));
    }

    #[test]
    fn test_backoff_schedule() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_for(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(400));
    }
}
