//! Error taxonomy for the exchange core
//!
//! Errors are surfaced by kind, not by transport: validation and
//! authorization failures reject synchronously, reservation failures carry
//! the shortfall, conflicts are retried by the caller, and invariant
//! breaches are critical.

use crate::numeric::Cash;
use thiserror::Error;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Cash, available: Cash },

    #[error("insufficient shares: required {required}, available {available}")]
    InsufficientShares { required: u64, available: u64 },

    #[error("update would drive {field} negative")]
    NegativeResult { field: String },

    #[error("account {user} is quarantined pending review")]
    AccountQuarantined { user: String },
}

impl LedgerError {
    /// True for the invariant-breach class that quarantines the account
    pub fn is_invariant_breach(&self) -> bool {
        matches!(self, LedgerError::NegativeResult { .. })
    }
}

/// Order state errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("duplicate order id: {order_id}")]
    DuplicateId { order_id: String },

    #[error("order {order_id} in status {status} cannot receive fills")]
    NotFillable { order_id: String, status: String },

    #[error("fill of {fill} exceeds remaining {remaining} on order {order_id}")]
    FillExceedsQuantity {
        order_id: String,
        fill: u64,
        remaining: u64,
    },

    #[error("invalid transition from {from} to {to} on order {order_id}")]
    InvalidTransition {
        order_id: String,
        from: String,
        to: String,
    },
}

/// Submission errors, surfaced to the caller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] OrderError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Cancellation errors, surfaced to the caller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CancelError {
    #[error("order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("order {order_id} does not belong to the acting user")]
    Forbidden { order_id: String },

    #[error("concurrent update lost: {0}")]
    Conflict(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Matching errors, retried by the worker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("serialization conflict: {0}")]
    Conflict(String),

    #[error("matching transaction exceeded {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

impl MatchError {
    /// True when the worker should retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatchError::Conflict(_) | MatchError::Timeout { .. })
    }
}

/// Work-queue errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("queue {name} is shut down")]
    Closed { name: String },
}

/// Top-level error aggregating all component kinds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Cancel(#[from] CancelError),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
