//! Event broadcasting with trailing debounce
//!
//! `priceUpdate` and `marketUpdate` requests are coalesced per
//! (symbol, kind): each request records the latest payload and arms a
//! short trailing timer; a hard max-wait deadline armed at the first
//! un-emitted request guarantees a flush under sustained traffic.
//! Whichever timer fires first emits the latest payload and disarms the
//! other. `tradeCompleted` and `klineUpdate` bypass coalescing entirely.
//!
//! The sink is pluggable; the default fans out on a tokio broadcast
//! channel that `subscribe` taps.

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use types::events::{ExchangeEvent, UpdateKind};
use types::ids::Symbol;

/// Where emitted events go
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExchangeEvent);
}

/// Default sink: tokio broadcast fan-out
pub struct BroadcastSink {
    tx: broadcast::Sender<ExchangeEvent>,
}

impl BroadcastSink {
    /// Create a sink with the given subscriber channel capacity
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    /// Open a subscription to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: ExchangeEvent) {
        // A send error just means nobody is listening right now
        let _ = self.tx.send(event);
    }
}

/// Debounce tunables
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Trailing quiet window before a coalesced emit
    pub debounce: Duration,
    /// Hard deadline after the first un-emitted request
    pub max_wait: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            max_wait: Duration::from_millis(500),
        }
    }
}

struct Pending {
    latest: ExchangeEvent,
    /// Bumped on every request; a debounce timer only fires for the
    /// generation it was armed with
    generation: u64,
    /// Identifies one coalescing cycle; guards the max-wait timer against
    /// firing into a later cycle
    epoch: u64,
}

enum FlushGuard {
    Generation(u64),
    Epoch(u64),
}

struct BroadcasterState {
    sink: Arc<dyn EventSink>,
    pending: Mutex<HashMap<(Symbol, UpdateKind), Pending>>,
    epochs: AtomicU64,
    config: BroadcastConfig,
}

impl BroadcasterState {
    fn flush_if(&self, key: &(Symbol, UpdateKind), guard: FlushGuard) {
        let flushed = {
            let mut pending = self.pending.lock();
            let current = match pending.get(key) {
                Some(slot) => match guard {
                    FlushGuard::Generation(generation) => slot.generation == generation,
                    FlushGuard::Epoch(epoch) => slot.epoch == epoch,
                },
                None => false,
            };
            if current {
                pending.remove(key).map(|slot| slot.latest)
            } else {
                None
            }
        };
        if let Some(event) = flushed {
            debug!(event = event.label(), symbol = %event.symbol(), "coalesced emit");
            self.sink.emit(event);
        }
    }
}

/// Coalescing broadcaster over a pluggable sink
pub struct Broadcaster {
    state: Arc<BroadcasterState>,
}

impl Broadcaster {
    pub fn new(sink: Arc<dyn EventSink>, config: BroadcastConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(BroadcasterState {
                sink,
                pending: Mutex::new(HashMap::new()),
                epochs: AtomicU64::new(0),
                config,
            }),
        })
    }

    /// Emit immediately, without coalescing
    pub fn emit_now(&self, event: ExchangeEvent) {
        self.state.sink.emit(event);
    }

    /// Request a coalesced emit; non-coalescable events pass straight
    /// through
    pub fn request(&self, event: ExchangeEvent) {
        let Some(key) = event.coalesce_key() else {
            self.emit_now(event);
            return;
        };

        let state = &self.state;
        let (generation, new_cycle_epoch) = {
            let mut pending = state.pending.lock();
            match pending.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    let slot = entry.get_mut();
                    slot.latest = event;
                    slot.generation += 1;
                    (slot.generation, None)
                }
                Entry::Vacant(entry) => {
                    let epoch = state.epochs.fetch_add(1, Ordering::Relaxed);
                    entry.insert(Pending {
                        latest: event,
                        generation: 0,
                        epoch,
                    });
                    (0, Some(epoch))
                }
            }
        };

        // Trailing debounce: re-armed on every request
        let timer_state = Arc::clone(state);
        let debounce_key = key.clone();
        let debounce = state.config.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            timer_state.flush_if(&debounce_key, FlushGuard::Generation(generation));
        });

        // Max-wait: armed once per coalescing cycle
        if let Some(epoch) = new_cycle_epoch {
            let timer_state = Arc::clone(state);
            let max_wait = state.config.max_wait;
            tokio::spawn(async move {
                tokio::time::sleep(max_wait).await;
                timer_state.flush_if(&key, FlushGuard::Epoch(epoch));
            });
        }
    }

    /// Pending coalesced payloads (for inspection)
    pub fn pending_len(&self) -> usize {
        self.state.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::TradeId;
    use types::numeric::Price;

    /// Sink that records every emitted event
    struct CollectSink {
        events: Mutex<Vec<ExchangeEvent>>,
    }

    impl CollectSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn emitted(&self) -> Vec<ExchangeEvent> {
            self.events.lock().clone()
        }
    }

    impl EventSink for CollectSink {
        fn emit(&self, event: ExchangeEvent) {
            self.events.lock().push(event);
        }
    }

    fn price_update(price: u64) -> ExchangeEvent {
        ExchangeEvent::PriceUpdate {
            symbol: Symbol::new("ACME"),
            price: Price::from_u64(price),
            volume: 1,
            timestamp: 0,
            trade_id: TradeId::new(),
        }
    }

    fn trade_completed() -> ExchangeEvent {
        ExchangeEvent::TradeCompleted {
            symbol: Symbol::new("ACME"),
            weighted_avg_price: Price::from_u64(100),
            total_volume: 1,
            batch_size: 1,
            first_trade_id: TradeId::new(),
            timestamp: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_flushes_after_debounce() {
        let sink = CollectSink::new();
        let broadcaster = Broadcaster::new(sink.clone(), BroadcastConfig::default());

        broadcaster.request(price_update(100));
        assert!(sink.emitted().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let emitted = sink.emitted();
        assert_eq!(emitted.len(), 1);
        assert_eq!(broadcaster.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_requests_coalesce_to_latest() {
        let sink = CollectSink::new();
        let broadcaster = Broadcaster::new(sink.clone(), BroadcastConfig::default());

        for price in [100, 101, 102] {
            broadcaster.request(price_update(price));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        let emitted = sink.emitted();
        assert_eq!(emitted.len(), 1, "one coalesced emit");
        match &emitted[0] {
            ExchangeEvent::PriceUpdate { price, .. } => {
                assert_eq!(*price, Price::from_u64(102), "latest payload wins");
            }
            other => panic!("expected PriceUpdate, got {}", other.label()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_fires_under_sustained_traffic() {
        let sink = CollectSink::new();
        let broadcaster = Broadcaster::new(sink.clone(), BroadcastConfig::default());

        // A request every 30 ms keeps resetting the 50 ms debounce
        for i in 0..20 {
            broadcaster.request(price_update(100 + i));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // The 500 ms max-wait must have forced at least one emit
        assert!(
            !sink.emitted().is_empty(),
            "max-wait must flush despite constant traffic"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_max_wait_does_not_double_emit() {
        let sink = CollectSink::new();
        let broadcaster = Broadcaster::new(sink.clone(), BroadcastConfig::default());

        // First cycle: debounce flush
        broadcaster.request(price_update(100));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.emitted().len(), 1);

        // Second cycle starts before the first cycle's max-wait expires
        broadcaster.request(price_update(200));
        tokio::time::sleep(Duration::from_millis(600)).await;

        // Exactly two emits: the stale max-wait timer was disarmed
        assert_eq!(sink.emitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_coalesce_independently() {
        let sink = CollectSink::new();
        let broadcaster = Broadcaster::new(sink.clone(), BroadcastConfig::default());

        broadcaster.request(price_update(100));
        broadcaster.request(ExchangeEvent::MarketUpdate {
            symbol: Symbol::new("ACME"),
            last_price: Price::from_u64(100),
            open: Price::from_u64(100),
            high: Price::from_u64(100),
            low: Price::from_u64(100),
            volume: 1,
            change: rust_decimal::Decimal::ZERO,
            change_percent: rust_decimal::Decimal::ZERO,
            timestamp: 0,
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.emitted().len(), 2, "price and market flush separately");
    }

    #[tokio::test]
    async fn test_trade_completed_bypasses_coalescing() {
        let sink = CollectSink::new();
        let broadcaster = Broadcaster::new(sink.clone(), BroadcastConfig::default());

        broadcaster.request(trade_completed());
        broadcaster.request(trade_completed());

        // No timers involved: both already emitted
        assert_eq!(sink.emitted().len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_sink_fan_out() {
        let sink = BroadcastSink::new(16);
        let mut rx1 = sink.subscribe();
        let mut rx2 = sink.subscribe();

        sink.emit(trade_completed());

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
