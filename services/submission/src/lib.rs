//! Order submission and cancellation
//!
//! Submission validates the request, computes the reservation, creates the
//! order together with its reservation (no order is persisted if the
//! reservation fails), and enqueues a process-order job. The caller gets
//! `{order_id, PENDING}` back immediately; matching is asynchronous.
//!
//! Cancellation is user-initiated, idempotent on terminal orders, and
//! releases exactly the residual reservation, clamped to what the account
//! still holds as a safety floor.

use ledger::Ledger;
use order_store::OrderStore;
use std::sync::Arc;
use tracing::{info, warn};
use types::errors::{CancelError, SubmitError};
use types::ids::{OrderId, Symbol, UserId};
use types::numeric::{Cash, Price};
use types::order::{Order, OrderMethod, OrderStatus, Side};
use types::time::now_millis;
use work_queue::{Job, JobPayload, WorkQueues, PRIORITY_HIGH, PRIORITY_NORMAL};

/// Submission request record
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub method: OrderMethod,
    pub limit_price: Option<Price>,
    pub quantity: u64,
}

/// Immediate submission result
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

/// Submission and cancellation service
pub struct SubmissionService {
    ledger: Arc<Ledger>,
    orders: Arc<OrderStore>,
    queues: Arc<WorkQueues>,
}

impl SubmissionService {
    pub fn new(ledger: Arc<Ledger>, orders: Arc<OrderStore>, queues: Arc<WorkQueues>) -> Self {
        Self {
            ledger,
            orders,
            queues,
        }
    }

    /// Submit an order
    ///
    /// Reserves cash (BUY) or shares (SELL) and persists the order as one
    /// step; a failed reservation leaves nothing behind. A BUY MARKET
    /// reserves the caller's entire available cash since it has no price
    /// ceiling; the surplus is released when the order finalizes.
    pub fn submit(&self, request: OrderRequest) -> Result<SubmitReceipt, SubmitError> {
        Self::validate(&request)?;
        let now = now_millis();

        let reserved_cash = match (request.side, request.method) {
            (Side::Buy, OrderMethod::Limit) => {
                let price = request.limit_price.expect("validated: LIMIT carries a price");
                let amount = Cash::notional(price, request.quantity);
                self.ledger.reserve_cash(request.user_id, amount)?;
                amount
            }
            (Side::Buy, OrderMethod::Market) => {
                let available = self.ledger.cash_available(request.user_id);
                if available.is_zero() {
                    return Err(SubmitError::Ledger(
                        types::errors::LedgerError::InsufficientFunds {
                            required: available,
                            available,
                        },
                    ));
                }
                self.ledger.reserve_cash(request.user_id, available)?;
                available
            }
            (Side::Sell, _) => {
                self.ledger
                    .reserve_shares(request.user_id, &request.symbol, request.quantity)?;
                Cash::ZERO
            }
        };

        let order = Order::new(
            request.user_id,
            request.symbol.clone(),
            request.side,
            request.method,
            request.limit_price,
            request.quantity,
            reserved_cash,
            now,
        );
        let order_id = order.id;

        if let Err(err) = self.orders.insert(order) {
            // Creation and reservation are one step: undo the reservation
            self.rollback_reservation(&request, reserved_cash);
            return Err(err.into());
        }

        let priority = match request.method {
            OrderMethod::Market => PRIORITY_HIGH,
            OrderMethod::Limit => PRIORITY_NORMAL,
        };
        let job = Job::new(
            JobPayload::ProcessOrder {
                order_id,
                symbol: request.symbol.clone(),
            },
            priority,
            now,
        );
        if let Err(err) = self.queues.order_processing.enqueue(job) {
            // Shutting down: take the order back out of play
            let _ = self.orders.transition(
                order_id,
                &[OrderStatus::Pending],
                OrderStatus::Cancelled,
                now,
            );
            self.rollback_reservation(&request, reserved_cash);
            return Err(err.into());
        }

        info!(
            order_id = %order_id,
            user = %request.user_id,
            symbol = %request.symbol,
            side = ?request.side,
            method = ?request.method,
            quantity = request.quantity,
            "order submitted"
        );
        Ok(SubmitReceipt {
            order_id,
            status: OrderStatus::Pending,
        })
    }

    /// Cancel an order
    ///
    /// Terminal orders cancel idempotently (success, no ledger effect).
    /// Otherwise the order transitions to CANCELLED atomically and the
    /// residual reservation is released.
    pub fn cancel(&self, order_id: OrderId, user: UserId) -> Result<(), CancelError> {
        let order = self.orders.get(order_id).ok_or_else(|| CancelError::NotFound {
            order_id: order_id.to_string(),
        })?;
        if order.user_id != user {
            return Err(CancelError::Forbidden {
                order_id: order_id.to_string(),
            });
        }
        if order.status.is_terminal() {
            return Ok(());
        }

        let now = now_millis();
        let cancelled = match self.orders.transition(
            order_id,
            &[
                OrderStatus::Pending,
                OrderStatus::Open,
                OrderStatus::PartiallyFilled,
            ],
            OrderStatus::Cancelled,
            now,
        ) {
            Ok(order) => order,
            Err(_) => {
                // Lost the race against matching; terminal now means done
                let current = self.orders.get(order_id).ok_or_else(|| CancelError::NotFound {
                    order_id: order_id.to_string(),
                })?;
                if current.status.is_terminal() {
                    return Ok(());
                }
                return Err(CancelError::Conflict(format!(
                    "order {} changed state during cancel",
                    order_id
                )));
            }
        };

        self.release_residual(&cancelled)?;
        info!(order_id = %order_id, user = %user, filled = cancelled.filled_qty, "order cancelled");
        Ok(())
    }

    /// Release what a terminal order still holds
    ///
    /// BUY releases `reserved − consumed` cash, SELL releases the unfilled
    /// share quantity, both clamped to the account's current reservation.
    pub fn release_residual(&self, order: &Order) -> Result<(), CancelError> {
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

    fn validate(request: &OrderRequest) -> Result<(), SubmitError> {
        if request.quantity == 0 {
            return Err(SubmitError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        match request.method {
            OrderMethod::Limit if request.limit_price.is_none() => Err(SubmitError::Validation(
                "LIMIT order requires a limit price".to_string(),
            )),
            OrderMethod::Market if request.limit_price.is_some() => Err(SubmitError::Validation(
                "MARKET order must not carry a limit price".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn rollback_reservation(&self, request: &OrderRequest, reserved_cash: Cash) {
        let result = match request.side {
            Side::Buy => self.ledger.release_cash(request.user_id, reserved_cash),
            Side::Sell => {
                self.ledger
                    .release_shares(request.user_id, &request.symbol, request.quantity)
            }
        };
        if let Err(err) = result {
            warn!(user = %request.user_id, error = %err, "reservation rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use work_queue::RetryConfig;

    struct Fixture {
        ledger: Arc<Ledger>,
        orders: Arc<OrderStore>,
        queues: Arc<WorkQueues>,
        service: SubmissionService,
    }

    fn make_fixture() -> Fixture {
        let ledger = Arc::new(Ledger::new());
        let orders = Arc::new(OrderStore::new());
        let queues = WorkQueues::new(RetryConfig::default());
        let service = SubmissionService::new(
            Arc::clone(&ledger),
            Arc::clone(&orders),
            Arc::clone(&queues),
        );
        Fixture {
            ledger,
            orders,
            queues,
            service,
        }
    }

    fn buy_limit(user: UserId, price: u64, qty: u64) -> OrderRequest {
        OrderRequest {
            user_id: user,
            symbol: Symbol::new("ACME"),
            side: Side::Buy,
            method: OrderMethod::Limit,
            limit_price: Some(Price::from_u64(price)),
            quantity: qty,
        }
    }

    fn sell_limit(user: UserId, price: u64, qty: u64) -> OrderRequest {
        OrderRequest {
            user_id: user,
            symbol: Symbol::new("ACME"),
            side: Side::Sell,
            method: OrderMethod::Limit,
            limit_price: Some(Price::from_u64(price)),
            quantity: qty,
        }
    }

    #[tokio::test]
    async fn test_buy_limit_reserves_notional() {
        let fx = make_fixture();
        let user = UserId::new();
        fx.ledger.deposit_cash(user, Cash::from_u64(1000)).unwrap();

        let receipt = fx.service.submit(buy_limit(user, 100, 5)).unwrap();
        assert_eq!(receipt.status, OrderStatus::Pending);

        let account = fx.ledger.get_account(user).unwrap();
        assert_eq!(account.cash_reserved, Cash::from_u64(500));

        let order = fx.orders.get(receipt.order_id).unwrap();
        assert_eq!(order.reserved_cash, Cash::from_u64(500));

        // A process-order job was enqueued
        let job = fx.queues.order_processing.dequeue().await.unwrap();
        assert_eq!(job.priority, PRIORITY_NORMAL);
    }

    #[tokio::test]
    async fn test_buy_market_reserves_all_available() {
        let fx = make_fixture();
        let user = UserId::new();
        fx.ledger.deposit_cash(user, Cash::from_u64(750)).unwrap();

        let receipt = fx
            .service
            .submit(OrderRequest {
                user_id: user,
                symbol: Symbol::new("ACME"),
                side: Side::Buy,
                method: OrderMethod::Market,
                limit_price: None,
                quantity: 3,
            })
            .unwrap();

        let account = fx.ledger.get_account(user).unwrap();
        assert_eq!(account.cash_reserved, Cash::from_u64(750));
        assert_eq!(
            fx.orders.get(receipt.order_id).unwrap().reserved_cash,
            Cash::from_u64(750)
        );

        let job = fx.queues.order_processing.dequeue().await.unwrap();
        assert_eq!(job.priority, PRIORITY_HIGH);
    }

    #[test]
    fn test_buy_market_with_no_cash_rejected() {
        let fx = make_fixture();
        let err = fx
            .service
            .submit(OrderRequest {
                user_id: UserId::new(),
                symbol: Symbol::new("ACME"),
                side: Side::Buy,
                method: OrderMethod::Market,
                limit_price: None,
                quantity: 1,
            })
            .unwrap_err();
        assert!(matches!(err, SubmitError::Ledger(_)));
    }

    #[test]
    fn test_sell_reserves_shares() {
        let fx = make_fixture();
        let user = UserId::new();
        fx.ledger
            .deposit_shares(user, &Symbol::new("ACME"), 10, None)
            .unwrap();

        fx.service.submit(sell_limit(user, 100, 4)).unwrap();

        let position = fx
            .ledger
            .get_position(user, &Symbol::new("ACME"))
            .unwrap();
        assert_eq!(position.qty_reserved, 4);
    }

    #[test]
    fn test_failed_reservation_persists_nothing() {
        let fx = make_fixture();
        let user = UserId::new();
        fx.ledger.deposit_cash(user, Cash::from_u64(100)).unwrap();

        let err = fx.service.submit(buy_limit(user, 100, 5)).unwrap_err();
        assert!(matches!(err, SubmitError::Ledger(_)));
        assert!(fx.orders.is_empty());
        assert_eq!(fx.queues.order_processing.depth(), 0);
        assert_eq!(
            fx.ledger.get_account(user).unwrap().cash_reserved,
            Cash::ZERO
        );
    }

    #[test]
    fn test_validation_rejects() {
        let fx = make_fixture();
        let user = UserId::new();

        assert!(matches!(
            fx.service.submit(buy_limit(user, 100, 0)).unwrap_err(),
            SubmitError::Validation(_)
        ));

        let mut no_price = buy_limit(user, 100, 1);
        no_price.limit_price = None;
        assert!(matches!(
            fx.service.submit(no_price).unwrap_err(),
            SubmitError::Validation(_)
        ));

        let market_with_price = OrderRequest {
            user_id: user,
            symbol: Symbol::new("ACME"),
            side: Side::Buy,
            method: OrderMethod::Market,
            limit_price: Some(Price::from_u64(100)),
            quantity: 1,
        };
        assert!(matches!(
            fx.service.submit(market_with_price).unwrap_err(),
            SubmitError::Validation(_)
        ));
    }

    #[test]
    fn test_cancel_releases_residual_cash() {
        let fx = make_fixture();
        let user = UserId::new();
        fx.ledger.deposit_cash(user, Cash::from_u64(1000)).unwrap();

        let receipt = fx.service.submit(buy_limit(user, 100, 10)).unwrap();
        fx.service.cancel(receipt.order_id, user).unwrap();

        let account = fx.ledger.get_account(user).unwrap();
        assert_eq!(account.cash_reserved, Cash::ZERO);
        assert_eq!(account.cash_total, Cash::from_u64(1000));
        assert_eq!(
            fx.orders.get(receipt.order_id).unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn test_cancel_releases_residual_shares() {
        let fx = make_fixture();
        let user = UserId::new();
        fx.ledger
            .deposit_shares(user, &Symbol::new("ACME"), 10, None)
            .unwrap();

        let receipt = fx.service.submit(sell_limit(user, 100, 6)).unwrap();
        fx.service.cancel(receipt.order_id, user).unwrap();

        let position = fx
            .ledger
            .get_position(user, &Symbol::new("ACME"))
            .unwrap();
        assert_eq!(position.qty_reserved, 0);
        assert_eq!(position.qty_total, 10);
    }

    #[test]
    fn test_cancel_terminal_is_idempotent() {
        let fx = make_fixture();
        let user = UserId::new();
        fx.ledger.deposit_cash(user, Cash::from_u64(1000)).unwrap();

        let receipt = fx.service.submit(buy_limit(user, 100, 5)).unwrap();
        fx.service.cancel(receipt.order_id, user).unwrap();

        let reserved_after_first = fx.ledger.get_account(user).unwrap().cash_reserved;
        fx.service.cancel(receipt.order_id, user).unwrap();
        assert_eq!(
            fx.ledger.get_account(user).unwrap().cash_reserved,
            reserved_after_first,
            "second cancel must be a ledger no-op"
        );
    }

    #[test]
    fn test_cancel_authorization() {
        let fx = make_fixture();
        let owner = UserId::new();
        fx.ledger.deposit_cash(owner, Cash::from_u64(1000)).unwrap();
        let receipt = fx.service.submit(buy_limit(owner, 100, 5)).unwrap();

        let err = fx.service.cancel(receipt.order_id, UserId::new()).unwrap_err();
        assert!(matches!(err, CancelError::Forbidden { .. }));

        let err = fx.service.cancel(OrderId::new(), owner).unwrap_err();
        assert!(matches!(err, CancelError::NotFound { .. }));
    }
}
