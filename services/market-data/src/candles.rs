//! Candle building and persistence
//!
//! Trades fold into a per-symbol current-minute accumulator; when a trade
//! belongs to a later minute the accumulator closes, the base candle is
//! upserted, and the affected higher-period buckets are re-aggregated from
//! the base range. A periodic maintenance pass flushes elapsed accumulators
//! and synthesizes flat candles for tradeless minutes, bounded to a rolling
//! horizon.
//!
//! Batch application is idempotent: batch ids are remembered with a TTL,
//! so at-least-once delivery never double-counts a trade.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use types::candle::{Candle, Period};
use types::events::ExchangeEvent;
use types::ids::{BatchId, Symbol};
use types::trade::TradeBatch;

/// Candle service tunables
#[derive(Debug, Clone)]
pub struct CandleConfig {
    /// How long processed batch ids are remembered for dedupe
    pub dedupe_ttl: Duration,
    /// How far back gap filling will synthesize flat candles
    pub gap_horizon: Duration,
    /// Cadence of the maintenance pass (flush + gap fill)
    pub maintenance_interval: Duration,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            dedupe_ttl: Duration::from_secs(600),
            gap_horizon: Duration::from_secs(3600),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// Persisted candles, keyed `(symbol, period) → open_time → candle`
///
/// BTreeMap gives deterministic chronological range scans.
pub struct CandleStore {
    candles: DashMap<(Symbol, Period), BTreeMap<i64, Candle>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self {
            candles: DashMap::new(),
        }
    }

    /// Insert or replace the candle at its `(symbol, period, open_time)`
    pub fn upsert(&self, candle: Candle) -> bool {
        let mut series = self
            .candles
            .entry((candle.symbol.clone(), candle.period))
            .or_default();
        series.insert(candle.open_time, candle).is_none()
    }

    /// Candles with `from ≤ open_time < to`, chronological
    pub fn range(&self, symbol: &Symbol, period: Period, from: i64, to: i64) -> Vec<Candle> {
        self.candles
            .get(&(symbol.clone(), period))
            .map(|series| series.range(from..to).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default()
    }

    /// The most recent `limit` candles, chronological
    pub fn recent(&self, symbol: &Symbol, period: Period, limit: usize) -> Vec<Candle> {
        self.candles
            .get(&(symbol.clone(), period))
            .map(|series| {
                let mut recent: Vec<Candle> =
                    series.values().rev().take(limit).cloned().collect();
                recent.reverse();
                recent
            })
            .unwrap_or_default()
    }

    /// Latest candle of a series
    pub fn last(&self, symbol: &Symbol, period: Period) -> Option<Candle> {
        self.candles
            .get(&(symbol.clone(), period))
            .and_then(|series| series.values().next_back().cloned())
    }

    /// Latest candle opening strictly before `before`
    pub fn last_before(&self, symbol: &Symbol, period: Period, before: i64) -> Option<Candle> {
        self.candles
            .get(&(symbol.clone(), period))
            .and_then(|series| series.range(..before).next_back().map(|(_, c)| c.clone()))
    }

    /// Symbols that have at least one base candle
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .candles
            .iter()
            .filter(|entry| entry.key().1 == Period::M1 && !entry.value().is_empty())
            .map(|entry| entry.key().0.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

impl Default for CandleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds candles from trade batches
pub struct CandleService {
    store: Arc<CandleStore>,
    /// Current-minute accumulator per symbol (always a 1m candle)
    accumulators: Mutex<HashMap<Symbol, Candle>>,
    /// Batch-id dedupe set with insertion timestamps
    seen_batches: Mutex<HashMap<BatchId, i64>>,
    config: CandleConfig,
}

impl CandleService {
    pub fn new(store: Arc<CandleStore>, config: CandleConfig) -> Self {
        Self {
            store,
            accumulators: Mutex::new(HashMap::new()),
            seen_batches: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Persisted candle access
    pub fn store(&self) -> &Arc<CandleStore> {
        &self.store
    }

    /// Service configuration
    pub fn config(&self) -> &CandleConfig {
        &self.config
    }

    /// Chronological candles for charting; the open accumulator is not
    /// included until its minute closes
    pub fn get_candles(&self, symbol: &Symbol, period: Period, limit: usize) -> Vec<Candle> {
        self.store.recent(symbol, period, limit)
    }

    /// Fold one trade batch into the candles
    ///
    /// Returns None for a replayed batch id (idempotent redelivery),
    /// otherwise the resulting kline events.
    pub fn apply_batch(&self, batch: &TradeBatch, now_ms: i64) -> Option<Vec<ExchangeEvent>> {
        if !self.remember_batch(batch.batch_id, now_ms) {
            debug!(batch_id = %batch.batch_id, "duplicate trade batch dropped");
            return None;
        }

        let mut events = Vec::new();
        let mut accumulators = self.accumulators.lock();
        let mut opened_this_batch = false;
        let mut updated_open = false;

        for trade in &batch.trades {
            let minute = Period::M1.align(trade.executed_at);
            let open_minute = accumulators.get(&batch.symbol).map(|c| c.open_time);

            match open_minute {
                Some(current) if minute == current => {
                    if let Some(candle) = accumulators.get_mut(&batch.symbol) {
                        candle.update(trade.price, trade.quantity);
                    }
                    updated_open = true;
                }
                Some(current) if minute > current => {
                    // Later minute: close the prior accumulator
                    if let Some(closed) = accumulators.remove(&batch.symbol) {
                        self.store.upsert(closed.clone());
                        let closed_minute = closed.open_time;
                        events.push(ExchangeEvent::KlineUpdate {
                            period: Period::M1,
                            candle: closed,
                            is_new_candle: false,
                        });
                        events.extend(self.reaggregate(&batch.symbol, closed_minute));
                    }

                    let candle = Candle::open_with(
                        batch.symbol.clone(),
                        Period::M1,
                        minute,
                        trade.price,
                        trade.quantity,
                    );
                    events.push(ExchangeEvent::KlineUpdate {
                        period: Period::M1,
                        candle: candle.clone(),
                        is_new_candle: true,
                    });
                    accumulators.insert(batch.symbol.clone(), candle);
                    opened_this_batch = true;
                    updated_open = false;
                }
                Some(_) => {
                    // Earlier minute than the open accumulator: fold into
                    // the already-persisted candle for that minute
                    let late = match self.store.last_before(&batch.symbol, Period::M1, minute + 1)
                    {
                        Some(mut candle) if candle.open_time == minute => {
                            candle.update(trade.price, trade.quantity);
                            candle
                        }
                        _ => Candle::open_with(
                            batch.symbol.clone(),
                            Period::M1,
                            minute,
                            trade.price,
                            trade.quantity,
                        ),
                    };
                    self.store.upsert(late.clone());
                    events.push(ExchangeEvent::KlineUpdate {
                        period: Period::M1,
                        candle: late,
                        is_new_candle: false,
                    });
                    events.extend(self.reaggregate(&batch.symbol, minute));
                }
                None => {
                    let candle = Candle::open_with(
                        batch.symbol.clone(),
                        Period::M1,
                        minute,
                        trade.price,
                        trade.quantity,
                    );
                    events.push(ExchangeEvent::KlineUpdate {
                        period: Period::M1,
                        candle: candle.clone(),
                        is_new_candle: true,
                    });
                    accumulators.insert(batch.symbol.clone(), candle);
                    opened_this_batch = true;
                }
            }
        }

        if updated_open && !opened_this_batch {
            if let Some(current) = accumulators.get(&batch.symbol) {
                events.push(ExchangeEvent::KlineUpdate {
                    period: Period::M1,
                    candle: current.clone(),
                    is_new_candle: false,
                });
            }
        }

        Some(events)
    }

    /// Close accumulators whose minute has elapsed
    pub fn flush_elapsed(&self, now_ms: i64) -> Vec<ExchangeEvent> {
        let current_minute = Period::M1.align(now_ms);
        let mut events = Vec::new();
        let mut accumulators = self.accumulators.lock();

        let elapsed: Vec<Symbol> = accumulators
            .iter()
            .filter(|(_, candle)| candle.open_time < current_minute)
            .map(|(symbol, _)| symbol.clone())
            .collect();

        for symbol in elapsed {
            if let Some(candle) = accumulators.remove(&symbol) {
                debug!(symbol = %symbol, open_time = candle.open_time, "flushing elapsed candle");
                self.store.upsert(candle.clone());
                let open_time = candle.open_time;
                events.push(ExchangeEvent::KlineUpdate {
                    period: Period::M1,
                    candle,
                    is_new_candle: false,
                });
                events.extend(self.reaggregate(&symbol, open_time));
            }
        }
        events
    }

    /// Synthesize flat candles for tradeless minutes
    ///
    /// For each symbol with persisted history, every missed minute after
    /// the last base candle (bounded to the rolling horizon, exclusive of
    /// the current minute) gets a flat candle carrying the last close.
    pub fn fill_gaps(&self, now_ms: i64) -> Vec<ExchangeEvent> {
        let current_minute = Period::M1.align(now_ms);
        let horizon_start = current_minute - self.config.gap_horizon.as_millis() as i64;
        let mut events = Vec::new();

        for symbol in self.store.active_symbols() {
            let Some(last) = self.store.last(&symbol, Period::M1) else {
                continue;
            };
            let mut prev_close = last.close;
            let mut t = (last.open_time + Period::M1.duration_ms()).max(horizon_start);

            while t < current_minute {
                if self.accumulator_minute(&symbol) == Some(t) {
                    t += Period::M1.duration_ms();
                    continue;
                }
                if let Some(existing) = self.store.last_before(&symbol, Period::M1, t + 1) {
                    if existing.open_time == t {
                        prev_close = existing.close;
                        t += Period::M1.duration_ms();
                        continue;
                    }
                }
                let flat = Candle::flat(symbol.clone(), Period::M1, t, prev_close);
                self.store.upsert(flat.clone());
                events.push(ExchangeEvent::KlineUpdate {
                    period: Period::M1,
                    candle: flat,
                    is_new_candle: true,
                });
                events.extend(self.reaggregate(&symbol, t));
                t += Period::M1.duration_ms();
            }
        }
        events
    }

    /// Re-derive every higher-period bucket containing `minute_start`
    fn reaggregate(&self, symbol: &Symbol, minute_start: i64) -> Vec<ExchangeEvent> {
        let mut events = Vec::new();
        for &period in Period::derived() {
            let period_start = period.align(minute_start);
            let bases = self.store.range(
                symbol,
                Period::M1,
                period_start,
                period_start + period.duration_ms(),
            );
            if let Some(candle) = Candle::aggregate(period, period_start, &bases) {
                let is_new_candle = self.store.upsert(candle.clone());
                events.push(ExchangeEvent::KlineUpdate {
                    period,
                    candle,
                    is_new_candle,
                });
            }
        }
        events
    }

    /// Record a batch id; false if it was already seen within the TTL
    fn remember_batch(&self, batch_id: BatchId, now_ms: i64) -> bool {
        let ttl = self.config.dedupe_ttl.as_millis() as i64;
        let mut seen = self.seen_batches.lock();
        seen.retain(|_, at| now_ms - *at < ttl);
        if seen.contains_key(&batch_id) {
            return false;
        }
        seen.insert(batch_id, now_ms);
        true
    }

    fn accumulator_minute(&self, symbol: &Symbol) -> Option<i64> {
        self.accumulators.lock().get(symbol).map(|c| c.open_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{OrderId, UserId};
    use types::numeric::Price;
    use types::trade::Trade;

    fn minute(n: i64) -> i64 {
        n * 60_000
    }

    fn make_trade(price: u64, qty: u64, executed_at: i64) -> Trade {
        Trade::new(
            Symbol::new("ACME"),
            OrderId::new(),
            OrderId::new(),
            UserId::new(),
            UserId::new(),
            Price::from_u64(price),
            qty,
            executed_at,
        )
    }

    fn make_batch(trades: Vec<Trade>) -> TradeBatch {
        let ts = trades.last().map(|t| t.executed_at).unwrap_or(0);
        TradeBatch::new(Symbol::new("ACME"), trades, ts)
    }

    fn make_service() -> CandleService {
        CandleService::new(Arc::new(CandleStore::new()), CandleConfig::default())
    }

    #[test]
    fn test_single_minute_accumulation() {
        let service = make_service();
        let symbol = Symbol::new("ACME");

        // Prices [101, 103, 100, 102], volumes [1, 2, 1, 1] in one minute
        let batch = make_batch(vec![
            make_trade(101, 1, minute(10) + 1_000),
            make_trade(103, 2, minute(10) + 10_000),
            make_trade(100, 1, minute(10) + 30_000),
            make_trade(102, 1, minute(10) + 50_000),
        ]);
        service.apply_batch(&batch, minute(10) + 51_000).unwrap();

        // Not yet persisted; close it by flushing the next minute
        let events = service.flush_elapsed(minute(11));
        assert!(!events.is_empty());

        let candles = service.get_candles(&symbol, Period::M1, 10);
        assert_eq!(candles.len(), 1);
        let candle = &candles[0];
        assert_eq!(candle.open, Price::from_u64(101));
        assert_eq!(candle.high, Price::from_u64(103));
        assert_eq!(candle.low, Price::from_u64(100));
        assert_eq!(candle.close, Price::from_u64(102));
        assert_eq!(candle.volume, 5);
    }

    #[test]
    fn test_later_minute_closes_prior() {
        let service = make_service();
        let symbol = Symbol::new("ACME");

        service
            .apply_batch(&make_batch(vec![make_trade(100, 1, minute(1))]), minute(1))
            .unwrap();
        service
            .apply_batch(&make_batch(vec![make_trade(105, 2, minute(2))]), minute(2))
            .unwrap();

        let candles = service.get_candles(&symbol, Period::M1, 10);
        assert_eq!(candles.len(), 1, "minute 1 closed, minute 2 still open");
        assert_eq!(candles[0].open_time, minute(1));
        assert_eq!(candles[0].close, Price::from_u64(100));
    }

    #[test]
    fn test_duplicate_batch_dropped() {
        let service = make_service();
        let batch = make_batch(vec![make_trade(100, 1, minute(1))]);

        assert!(service.apply_batch(&batch, minute(1)).is_some());
        assert!(service.apply_batch(&batch, minute(1)).is_none());

        service.flush_elapsed(minute(2));
        let candles = service.get_candles(&Symbol::new("ACME"), Period::M1, 10);
        assert_eq!(candles[0].volume, 1, "replay must not double-count");
    }

    #[test]
    fn test_five_minute_aggregation() {
        let service = make_service();
        let symbol = Symbol::new("ACME");

        // One trade per minute for minutes 0..5 at climbing prices
        for i in 0..5i64 {
            service
                .apply_batch(
                    &make_batch(vec![make_trade(100 + i as u64, 1, minute(i))]),
                    minute(i),
                )
                .unwrap();
        }
        service.flush_elapsed(minute(5));

        let m5 = service.get_candles(&symbol, Period::M5, 10);
        assert_eq!(m5.len(), 1);
        assert_eq!(m5[0].open, Price::from_u64(100));
        assert_eq!(m5[0].close, Price::from_u64(104));
        assert_eq!(m5[0].volume, 5);
    }

    #[test]
    fn test_gap_fill_flat_candles() {
        let service = make_service();
        let symbol = Symbol::new("ACME");

        service
            .apply_batch(&make_batch(vec![make_trade(100, 1, minute(1))]), minute(1))
            .unwrap();
        service.flush_elapsed(minute(2));

        // Minutes 2..5 had no trades
        let events = service.fill_gaps(minute(5));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(
                    e,
                    ExchangeEvent::KlineUpdate {
                        period: Period::M1,
                        ..
                    }
                ))
                .count(),
            3
        );

        let candles = service.get_candles(&symbol, Period::M1, 10);
        assert_eq!(candles.len(), 4);
        for flat in &candles[1..] {
            assert_eq!(flat.open, Price::from_u64(100));
            assert_eq!(flat.close, Price::from_u64(100));
            assert_eq!(flat.volume, 0);
        }
    }

    #[test]
    fn test_gap_fill_bounded_by_horizon() {
        let service = make_service();
        let symbol = Symbol::new("ACME");

        service
            .apply_batch(&make_batch(vec![make_trade(100, 1, minute(1))]), minute(1))
            .unwrap();
        service.flush_elapsed(minute(2));

        // Three hours later: only the last hour is synthesized
        service.fill_gaps(minute(181));
        let candles = service.get_candles(&symbol, Period::M1, 1000);
        // 1 real candle + 60 flats within the horizon
        assert_eq!(candles.len(), 61);
        assert_eq!(candles[1].open_time, minute(121));
    }

    #[test]
    fn test_gap_fill_skips_symbols_without_history() {
        let service = make_service();
        assert!(service.fill_gaps(minute(10)).is_empty());
    }

    #[test]
    fn test_flush_is_noop_for_current_minute() {
        let service = make_service();
        service
            .apply_batch(&make_batch(vec![make_trade(100, 1, minute(3))]), minute(3))
            .unwrap();

        // Same minute: nothing to flush
        assert!(service.flush_elapsed(minute(3) + 30_000).is_empty());
        assert!(service
            .get_candles(&Symbol::new("ACME"), Period::M1, 10)
            .is_empty());
    }

    #[test]
    fn test_kline_events_mark_new_candles() {
        let service = make_service();

        let events = service
            .apply_batch(&make_batch(vec![make_trade(100, 1, minute(1))]), minute(1))
            .unwrap();
        assert!(matches!(
            events[0],
            ExchangeEvent::KlineUpdate {
                is_new_candle: true,
                ..
            }
        ));

        let events = service
            .apply_batch(
                &make_batch(vec![make_trade(101, 1, minute(1) + 1000)]),
                minute(1) + 1000,
            )
            .unwrap();
        assert!(matches!(
            events.last().unwrap(),
            ExchangeEvent::KlineUpdate {
                is_new_candle: false,
                ..
            }
        ));
    }

    #[test]
    fn test_store_recent_chronological() {
        let store = CandleStore::new();
        let symbol = Symbol::new("ACME");
        for i in 0..5i64 {
            store.upsert(Candle::flat(
                symbol.clone(),
                Period::M1,
                minute(i),
                Price::from_u64(100),
            ));
        }

        let recent = store.recent(&symbol, Period::M1, 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].open_time, minute(2));
        assert_eq!(recent[2].open_time, minute(4));
    }

    #[test]
    fn test_store_last_before() {
        let store = CandleStore::new();
        let symbol = Symbol::new("ACME");
        store.upsert(Candle::flat(symbol.clone(), Period::M1, minute(1), Price::from_u64(100)));
        store.upsert(Candle::flat(symbol.clone(), Period::M1, minute(5), Price::from_u64(105)));

        assert_eq!(
            store
                .last_before(&symbol, Period::M1, minute(5))
                .unwrap()
                .open_time,
            minute(1)
        );
        assert!(store.last_before(&symbol, Period::M1, minute(1)).is_none());
    }
}
