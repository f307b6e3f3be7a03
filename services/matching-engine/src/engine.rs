//! Matching core
//!
//! One `process_order` call is one matching transaction: open the order,
//! sweep eligible opposing resting orders in price-time priority, settle
//! every fill, finalize the order, and seal the trades into a batch job.
//! The call is idempotent: an order that is no longer PENDING is a no-op,
//! which makes at-least-once job delivery safe.

use ledger::Ledger;
use order_store::{OrderStore, TradeStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use types::errors::{MatchError, OrderError};
use types::ids::OrderId;
use types::numeric::{Cash, Price};
use types::order::{Order, OrderMethod, OrderStatus, Side};
use types::time::now_millis;
use types::trade::{Trade, TradeBatch};
use work_queue::{Job, JobPayload, WorkQueues, PRIORITY_NORMAL};

/// Matching engine tunables
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Attempts per matching transaction on retryable failure
    pub retry_attempts: u32,
    /// First retry backoff
    pub retry_backoff_base: Duration,
    /// Multiplier applied per subsequent retry
    pub retry_backoff_factor: u32,
    /// Per-transaction deadline enforced by the worker
    pub txn_timeout: Duration,
    /// Fill price when neither side carries one and no trade ever printed
    pub fallback_price: Price,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff_base: Duration::from_millis(100),
            retry_backoff_factor: 2,
            txn_timeout: Duration::from_secs(60),
            fallback_price: Price::from_u64(100),
        }
    }
}

/// Result of one matching transaction
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Order was not PENDING (redelivery, cancel race, unknown id)
    NoOp,
    /// Matching ran to completion
    Completed {
        trades: usize,
        filled_qty: u64,
        final_status: OrderStatus,
    },
}

/// Price-time-priority matcher over the shared ledger and stores
pub struct MatchingEngine {
    ledger: Arc<Ledger>,
    orders: Arc<OrderStore>,
    trades: Arc<TradeStore>,
    queues: Arc<WorkQueues>,
    config: MatchConfig,
}

impl MatchingEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        orders: Arc<OrderStore>,
        trades: Arc<TradeStore>,
        queues: Arc<WorkQueues>,
        config: MatchConfig,
    ) -> Self {
        Self {
            ledger,
            orders,
            trades,
            queues,
            config,
        }
    }

    /// Matching configuration
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Run one matching transaction, retrying retryable failures with
    /// exponential backoff up to the configured attempt limit
    pub async fn process_order_with_retry(
        &self,
        order_id: OrderId,
    ) -> Result<MatchOutcome, MatchError> {
        let mut attempt = 0u32;
        loop {
            match self.process_order(order_id) {
                Err(err) if err.is_retryable() && attempt + 1 < self.config.retry_attempts => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff_base
                        * self.config.retry_backoff_factor.saturating_pow(attempt - 1);
                    warn!(
                        order_id = %order_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "matching conflict — retrying"
                    );
                    sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    /// Run one matching transaction
    pub fn process_order(&self, order_id: OrderId) -> Result<MatchOutcome, MatchError> {
        let now = now_millis();

        let Some(order) = self.orders.get(order_id) else {
            debug!(order_id = %order_id, "process-order for unknown id — no-op");
            return Ok(MatchOutcome::NoOp);
        };
        if order.status != OrderStatus::Pending {
            debug!(order_id = %order_id, status = order.status.label(), "not PENDING — no-op");
            return Ok(MatchOutcome::NoOp);
        }

        // Claim the order; losing this race (user cancel) is a no-op
        let mut incoming =
            match self
                .orders
                .transition(order_id, &[OrderStatus::Pending], OrderStatus::Open, now)
            {
                Ok(order) => order,
                Err(_) => return Ok(MatchOutcome::NoOp),
            };

        let mut batch_trades: Vec<Trade> = Vec::new();

        'sweep: while incoming.remaining_qty() > 0 {
            let candidates = self.orders.resting(
                &incoming.symbol,
                incoming.side.opposite(),
                incoming.limit_price,
                incoming.user_id,
            );
            if candidates.is_empty() {
                break;
            }

            let mut progressed = false;
            for candidate in candidates {
                if incoming.remaining_qty() == 0 {
                    break 'sweep;
                }

                // Resting orders are LIMIT by construction; the fallback
                // covers historical data where both sides lack a price
                let price = candidate
                    .limit_price
                    .or_else(|| self.trades.last_price(&incoming.symbol))
                    .unwrap_or(self.config.fallback_price);

                let fill_qty = {
                    let (buyer, seller) = match incoming.side {
                        Side::Buy => (&incoming, &candidate),
                        Side::Sell => (&candidate, &incoming),
                    };
                    let affordable = buyer.residual_cash().max_quantity_at(price);
                    if incoming.side == Side::Buy && affordable == 0 {
                        // Out of reserved cash; later candidates cost no less
                        break 'sweep;
                    }
                    incoming
                        .remaining_qty()
                        .min(candidate.remaining_qty())
                        .min(self.ledger.shares_reserved(seller.user_id, &seller.symbol))
                        .min(affordable)
                };
                if fill_qty == 0 {
                    // Defended against: a reservation shrank under us
                    continue;
                }

                let trade = match self.execute_fill(&incoming, &candidate, price, fill_qty, now) {
                    Ok(trade) => trade,
                    Err(MatchError::Order(OrderError::NotFillable { ref order_id, .. }))
                        if *order_id == candidate.id.to_string() =>
                    {
                        // Candidate left the book between query and lock
                        debug!(candidate = %candidate.id, "resting order gone — skipping");
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                batch_trades.push(trade);
                progressed = true;

                incoming = self.orders.get(order_id).ok_or_else(|| {
                    MatchError::Conflict(format!("order {} disappeared mid-match", order_id))
                })?;
            }

            if !progressed {
                break;
            }
        }

        let final_status = self.finalize(order_id, now)?;

        if !batch_trades.is_empty() {
            let filled: u64 = batch_trades.iter().map(|t| t.quantity).sum();
            let count = batch_trades.len();
            let batch = TradeBatch::new(incoming.symbol.clone(), batch_trades, now);
            info!(
                order_id = %order_id,
                symbol = %batch.symbol,
                trades = count,
                volume = batch.total_volume,
                status = final_status.label(),
                "matching produced trades"
            );
            let job = Job::new(JobPayload::BatchTrade { batch }, PRIORITY_NORMAL, now);
            if let Err(err) = self.queues.trade_processing.enqueue(job) {
                warn!(order_id = %order_id, error = %err, "trade batch dropped — queue closed");
            }
            return Ok(MatchOutcome::Completed {
                trades: count,
                filled_qty: filled,
                final_status,
            });
        }

        Ok(MatchOutcome::Completed {
            trades: 0,
            filled_qty: 0,
            final_status,
        })
    }

    /// Settle one fill: order rows, then ledger, then the trade record
    fn execute_fill(
        &self,
        incoming: &Order,
        candidate: &Order,
        price: Price,
        qty: u64,
        now: i64,
    ) -> Result<Trade, MatchError> {
        let (buy, sell) = match incoming.side {
            Side::Buy => (incoming, candidate),
            Side::Sell => (candidate, incoming),
        };
        let cash = Cash::notional(price, qty);

        self.orders
            .apply_fill_pair(buy.id, sell.id, qty, price, cash, now)?;

        self.ledger.settle_cash_debit(buy.user_id, cash)?;
        self.ledger
            .settle_share_debit(sell.user_id, &sell.symbol, qty)?;
        self.ledger.settle_cash_credit(sell.user_id, cash)?;
        self.ledger
            .settle_share_credit_with_cost(buy.user_id, &buy.symbol, qty, price)?;

        let trade = Trade::new(
            buy.symbol.clone(),
            buy.id,
            sell.id,
            buy.user_id,
            sell.user_id,
            price,
            qty,
            now,
        );
        debug_assert!(!trade.is_self_trade(), "book query must exclude own orders");
        debug!(
            trade_id = %trade.id,
            price = %price,
            qty,
            buyer = %buy.user_id,
            seller = %sell.user_id,
            "fill settled"
        );
        self.trades.record(trade.clone());
        Ok(trade)
    }

    /// Finalize the incoming order after the sweep
    ///
    /// Fully filled orders and cancelled MARKET residuals release whatever
    /// reservation they still hold; a LIMIT residual keeps its reservation
    /// and rests on the book.
    fn finalize(&self, order_id: OrderId, now: i64) -> Result<OrderStatus, MatchError> {
        let order = self.orders.get(order_id).ok_or_else(|| {
            MatchError::Conflict(format!("order {} disappeared during finalize", order_id))
        })?;

        if order.is_filled() {
            self.release_terminal_residual(&order)?;
            return Ok(OrderStatus::Filled);
        }

        if order.method == OrderMethod::Market {
            // MARKET orders never rest: cancel the residual
            let cancelled = match self.orders.transition(
                order_id,
                &[OrderStatus::Open, OrderStatus::PartiallyFilled],
                OrderStatus::Cancelled,
                now,
            ) {
                Ok(order) => order,
                // User cancel beat us to it; residual release already ran
                Err(_) => return Ok(self.orders.get(order_id).map_or(order.status, |o| o.status)),
            };
            self.release_terminal_residual(&cancelled)?;
            info!(
                order_id = %order_id,
                filled = cancelled.filled_qty,
                residual = cancelled.remaining_qty(),
                "market order residual cancelled"
            );
            return Ok(OrderStatus::Cancelled);
        }

        Ok(order.status)
    }

    /// Release what a terminal order still holds, clamped to the account's
    /// current reservation as a safety floor
    fn release_terminal_residual(&self, order: &Order) -> Result<(), MatchError> {
        match order.side {
            Side::Buy => {
                let account_reserved = self
                    .ledger
                    .get_account(order.user_id)
                    .map(|a| a.cash_reserved)
                    .unwrap_or(Cash::ZERO);
                let residual = order.residual_cash().min(account_reserved);
                if !residual.is_zero() {
                    self.ledger.release_cash(order.user_id, residual)?;
                }
            }
            Side::Sell => {
                let reserved = self.ledger.shares_reserved(order.user_id, &order.symbol);
                let residual = order.remaining_qty().min(reserved);
                if residual > 0 {
                    self.ledger
                        .release_shares(order.user_id, &order.symbol, residual)?;
                }
            }
        }
        Ok(())
    }
}
