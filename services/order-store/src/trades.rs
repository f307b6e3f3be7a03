//! Append-only trade store
//!
//! Trades are create-only records; the store additionally tracks the last
//! traded price per symbol, which feeds market statistics and the
//! matching engine's no-resting-price fallback.

use dashmap::DashMap;
use parking_lot::RwLock;
use types::ids::{Symbol, TradeId, UserId};
use types::numeric::Price;
use types::trade::{Trade, TradeBatch};

/// Append-only trade log with per-user and last-price indexes
pub struct TradeStore {
    trades: RwLock<Vec<Trade>>,
    by_user: DashMap<UserId, Vec<TradeId>>,
    last_price: DashMap<Symbol, Price>,
}

impl TradeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            trades: RwLock::new(Vec::new()),
            by_user: DashMap::new(),
            last_price: DashMap::new(),
        }
    }

    /// Append one trade
    pub fn record(&self, trade: Trade) {
        self.by_user
            .entry(trade.buy_user_id)
            .or_default()
            .push(trade.id);
        self.by_user
            .entry(trade.sell_user_id)
            .or_default()
            .push(trade.id);
        self.last_price.insert(trade.symbol.clone(), trade.price);
        self.trades.write().push(trade);
    }

    /// Append every trade of a batch
    pub fn record_batch(&self, batch: &TradeBatch) {
        for trade in &batch.trades {
            self.record(trade.clone());
        }
    }

    /// Trades involving one user, most recent first
    pub fn trades_for_user(&self, user: UserId) -> Vec<Trade> {
        let ids: Vec<TradeId> = match self.by_user.get(&user) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let trades = self.trades.read();
        let mut result: Vec<Trade> = trades
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.executed_at.cmp(&a.executed_at).then(b.id.cmp(&a.id)));
        result
    }

    /// Price of the most recent trade on a symbol
    pub fn last_price(&self, symbol: &Symbol) -> Option<Price> {
        self.last_price.get(symbol).map(|p| *p)
    }

    /// Total number of recorded trades
    pub fn len(&self) -> usize {
        self.trades.read().len()
    }

    /// Whether any trade has been recorded
    pub fn is_empty(&self) -> bool {
        self.trades.read().is_empty()
    }
}

impl Default for TradeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::OrderId;

    fn make_trade(buyer: UserId, seller: UserId, price: u64, executed_at: i64) -> Trade {
        Trade::new(
            Symbol::new("ACME"),
            OrderId::new(),
            OrderId::new(),
            buyer,
            seller,
            Price::from_u64(price),
            1,
            executed_at,
        )
    }

    #[test]
    fn test_record_and_count() {
        let store = TradeStore::new();
        assert!(store.is_empty());

        store.record(make_trade(UserId::new(), UserId::new(), 100, 1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_trades_for_user_both_sides() {
        let store = TradeStore::new();
        let user = UserId::new();

        store.record(make_trade(user, UserId::new(), 100, 1));
        store.record(make_trade(UserId::new(), user, 101, 2));
        store.record(make_trade(UserId::new(), UserId::new(), 102, 3));

        let trades = store.trades_for_user(user);
        assert_eq!(trades.len(), 2);
        // Most recent first
        assert_eq!(trades[0].executed_at, 2);
        assert_eq!(trades[1].executed_at, 1);
    }

    #[test]
    fn test_last_price_tracks_latest() {
        let store = TradeStore::new();
        let symbol = Symbol::new("ACME");
        assert!(store.last_price(&symbol).is_none());

        store.record(make_trade(UserId::new(), UserId::new(), 100, 1));
        store.record(make_trade(UserId::new(), UserId::new(), 105, 2));

        assert_eq!(store.last_price(&symbol), Some(Price::from_u64(105)));
    }

    #[test]
    fn test_record_batch() {
        let store = TradeStore::new();
        let batch = TradeBatch::new(
            Symbol::new("ACME"),
            vec![
                make_trade(UserId::new(), UserId::new(), 100, 1),
                make_trade(UserId::new(), UserId::new(), 101, 2),
            ],
            2,
        );

        store.record_batch(&batch);
        assert_eq!(store.len(), 2);
    }
}
