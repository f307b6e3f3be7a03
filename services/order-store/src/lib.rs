//! Order store
//!
//! Persists orders and answers the book query: the non-terminal resting
//! LIMIT orders of one side, sorted by price-time priority. Each order is
//! its own lockable row; fill and status mutations validate under the row
//! lock and either commit whole or leave the row untouched. A fill touches
//! two orders at once, so it locks both rows (in stable id order) and
//! validates both before mutating either.

pub mod trades;

pub use trades::TradeStore;

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;
use types::errors::OrderError;
use types::ids::{OrderId, Symbol, UserId};
use types::numeric::{Cash, Price};
use types::order::{Order, OrderMethod, OrderStatus, Side};

/// In-process order store with guarded atomic updates
pub struct OrderStore {
    orders: DashMap<OrderId, Arc<RwLock<Order>>>,
    by_user: DashMap<UserId, Vec<OrderId>>,
}

impl OrderStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Persist a new order
    pub fn insert(&self, order: Order) -> Result<(), OrderError> {
        if self.orders.contains_key(&order.id) {
            return Err(OrderError::DuplicateId {
                order_id: order.id.to_string(),
            });
        }
        self.by_user
            .entry(order.user_id)
            .or_default()
            .push(order.id);
        debug!(order_id = %order.id, user = %order.user_id, side = ?order.side, "order persisted");
        self.orders
            .insert(order.id, Arc::new(RwLock::new(order)));
        Ok(())
    }

    /// Fetch one order by id
    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.row(order_id).map(|row| row.read().clone())
    }

    /// All orders of one user, most recent first
    pub fn orders_for_user(&self, user: UserId) -> Vec<Order> {
        let ids = match self.by_user.get(&user) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let mut orders: Vec<Order> = ids
            .iter()
            .filter_map(|id| self.get(*id))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders
    }

    /// The book query: eligible resting orders for one side of a symbol
    ///
    /// Returns non-terminal LIMIT orders on `side`, excluding `exclude_user`
    /// (self-trade prevention). With a price limit, a SELL book is filtered
    /// to `price ≤ limit` and a BUY book to `price ≥ limit`; without one
    /// (incoming MARKET) no price relation applies. Sorted best price first
    /// (ascending for sells, descending for buys), then `created_at`, then
    /// id as the final tiebreak.
    pub fn resting(
        &self,
        symbol: &Symbol,
        side: Side,
        price_limit: Option<Price>,
        exclude_user: UserId,
    ) -> Vec<Order> {
        let mut book: Vec<Order> = self
            .orders
            .iter()
            .filter_map(|entry| {
                let order = entry.value().read();
                let eligible = order.symbol == *symbol
                    && order.side == side
                    && order.method == OrderMethod::Limit
                    && order.status.is_fillable()
                    && order.user_id != exclude_user
                    && match (price_limit, order.limit_price) {
                        (Some(limit), Some(price)) => match side {
                            Side::Sell => price <= limit,
                            Side::Buy => price >= limit,
                        },
                        _ => true,
                    };
                eligible.then(|| order.clone())
            })
            .collect();

        book.sort_by(|a, b| {
            let price_order = match side {
                Side::Sell => a.limit_price.cmp(&b.limit_price),
                Side::Buy => b.limit_price.cmp(&a.limit_price),
            };
            price_order
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        book
    }

    /// Apply one fill to both sides at once
    ///
    /// Locks the buy and sell rows in stable id order, validates both are
    /// fillable and that `qty` fits both remainders, then records the fill
    /// on each. Nothing is written unless both validations pass. Returns
    /// the updated snapshots.
    pub fn apply_fill_pair(
        &self,
        buy_id: OrderId,
        sell_id: OrderId,
        qty: u64,
        price: Price,
        buyer_cash: Cash,
        timestamp: i64,
    ) -> Result<(Order, Order), OrderError> {
        let buy_row = self.row(buy_id).ok_or_else(|| OrderError::NotFound {
            order_id: buy_id.to_string(),
        })?;
        let sell_row = self.row(sell_id).ok_or_else(|| OrderError::NotFound {
            order_id: sell_id.to_string(),
        })?;

        // Stable lock order prevents deadlock between concurrent pairs
        let (mut buy_guard, mut sell_guard) = if buy_id <= sell_id {
            let buy_guard = buy_row.write();
            let sell_guard = sell_row.write();
            (buy_guard, sell_guard)
        } else {
            let sell_guard = sell_row.write();
            let buy_guard = buy_row.write();
            (buy_guard, sell_guard)
        };
        let (buy, sell): (&mut Order, &mut Order) = (&mut *buy_guard, &mut *sell_guard);

        for order in [&*buy, &*sell] {
            if !order.status.is_fillable() {
                return Err(OrderError::NotFillable {
                    order_id: order.id.to_string(),
                    status: order.status.label().to_string(),
                });
            }
            if qty == 0 || qty > order.remaining_qty() {
                return Err(OrderError::FillExceedsQuantity {
                    order_id: order.id.to_string(),
                    fill: qty,
                    remaining: order.remaining_qty(),
                });
            }
        }

        buy.record_fill(qty, price, buyer_cash, timestamp)?;
        sell.record_fill(qty, price, Cash::ZERO, timestamp)?;
        Ok((buy.clone(), sell.clone()))
    }

    /// Compare-and-set status transition
    ///
    /// Succeeds only if the current status is in `allowed_from`. Returns
    /// the updated snapshot.
    pub fn transition(
        &self,
        order_id: OrderId,
        allowed_from: &[OrderStatus],
        to: OrderStatus,
        timestamp: i64,
    ) -> Result<Order, OrderError> {
        let row = self.row(order_id).ok_or_else(|| OrderError::NotFound {
            order_id: order_id.to_string(),
        })?;
        let mut order = row.write();
        order.transition(allowed_from, to, timestamp)?;
        debug!(order_id = %order_id, status = order.status.label(), "order transitioned");
        Ok(order.clone())
    }

    /// Number of orders in the store
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn row(&self, order_id: OrderId) -> Option<Arc<RwLock<Order>>> {
        self.orders.get(&order_id).map(|row| Arc::clone(row.value()))
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}
