//! Market data consumers
//!
//! Three loops: the trade consumer folds batches into candles and emits
//! trade/price events, the market consumer derives `marketUpdate`
//! statistics, and the maintenance loop flushes elapsed accumulators and
//! fills candle gaps once a minute.

use crate::broadcast::Broadcaster;
use crate::candles::CandleService;
use crate::stats;
use order_store::TradeStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use types::events::ExchangeEvent;
use types::time::now_millis;
use work_queue::{Job, JobPayload, WorkQueues, PRIORITY_NORMAL};

/// Queue consumers for the market-data pipeline
pub struct MarketDataWorker {
    candles: Arc<CandleService>,
    trades: Arc<TradeStore>,
    queues: Arc<WorkQueues>,
    broadcaster: Arc<Broadcaster>,
}

impl MarketDataWorker {
    pub fn new(
        candles: Arc<CandleService>,
        trades: Arc<TradeStore>,
        queues: Arc<WorkQueues>,
        broadcaster: Arc<Broadcaster>,
    ) -> Arc<Self> {
        Arc::new(Self {
            candles,
            trades,
            queues,
            broadcaster,
        })
    }

    /// Consume trade batches until the trade-processing queue closes
    pub async fn run_trade_consumer(self: Arc<Self>) {
        info!("trade consumer started");
        while let Some(job) = self.queues.trade_processing.dequeue().await {
            let JobPayload::BatchTrade { batch } = &job.payload else {
                self.queues.trade_processing.complete(&job);
                continue;
            };
            let now = now_millis();

            match self.candles.apply_batch(batch, now) {
                Some(kline_events) => {
                    // Every applied batch is summarized exactly once
                    if let Some(weighted_avg_price) = batch.weighted_avg_price() {
                        self.broadcaster.emit_now(ExchangeEvent::TradeCompleted {
                            symbol: batch.symbol.clone(),
                            weighted_avg_price,
                            total_volume: batch.total_volume,
                            batch_size: batch.batch_size(),
                            first_trade_id: batch.first_trade().id,
                            timestamp: batch.timestamp,
                        });
                    }
                    for event in kline_events {
                        self.broadcaster.emit_now(event);
                    }

                    let last = batch.last_trade();
                    self.broadcaster.request(ExchangeEvent::PriceUpdate {
                        symbol: batch.symbol.clone(),
                        price: last.price,
                        volume: batch.total_volume,
                        timestamp: batch.timestamp,
                        trade_id: last.id,
                    });

                    let _ = self.queues.market_data.enqueue(Job::new(
                        JobPayload::MarketUpdate {
                            symbol: batch.symbol.clone(),
                        },
                        PRIORITY_NORMAL,
                        now,
                    ));
                }
                None => {
                    debug!(batch_id = %batch.batch_id, "redelivered batch skipped");
                }
            }
            self.queues.trade_processing.complete(&job);
        }
        info!("trade consumer stopped");
    }

    /// Consume market-update jobs until the market-data queue closes
    pub async fn run_market_consumer(self: Arc<Self>) {
        info!("market consumer started");
        while let Some(job) = self.queues.market_data.dequeue().await {
            let JobPayload::MarketUpdate { symbol } = &job.payload else {
                self.queues.market_data.complete(&job);
                continue;
            };
            let now = now_millis();
            if let Some(event) = stats::market_update(
                self.candles.store(),
                symbol,
                self.trades.last_price(symbol),
                now,
            ) {
                self.broadcaster.request(event);
            }
            self.queues.market_data.complete(&job);
        }
        info!("market consumer stopped");
    }

    /// Periodic flush and gap fill; ends when `shutdown` flips
    pub async fn run_maintenance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.candles.config().maintenance_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("candle maintenance started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_maintenance_pass(now_millis());
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("candle maintenance stopped");
    }

    /// One maintenance pass: flush elapsed accumulators, fill gaps, and
    /// refresh statistics for every touched symbol
    pub fn run_maintenance_pass(&self, now_ms: i64) {
        let mut events = self.candles.flush_elapsed(now_ms);
        events.extend(self.candles.fill_gaps(now_ms));
        if events.is_empty() {
            return;
        }

        let mut symbols: Vec<_> = events.iter().map(|e| e.symbol().clone()).collect();
        symbols.sort();
        symbols.dedup();

        for event in events {
            self.broadcaster.emit_now(event);
        }
        for symbol in symbols {
            let _ = self.queues.market_data.enqueue(Job::new(
                JobPayload::MarketUpdate { symbol },
                PRIORITY_NORMAL,
                now_ms,
            ));
        }
    }
}
