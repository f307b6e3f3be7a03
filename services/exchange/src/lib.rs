//! Exchange core facade
//!
//! Wires the components leaf-first (ledger, stores, queues, then the
//! services that consume them) with plain constructors, and exposes the
//! function-level API: submit, cancel, account and history queries, candle
//! queries, and the event subscription.
//!
//! Components never call each other sideways: submission and matching
//! share the ledger and stores, and communicate only through the work
//! queues.
//!
//! `Exchange::start` must run inside a tokio runtime; it spawns the
//! matching dispatcher, the market-data consumers, and the candle
//! maintenance tick.

use ledger::Ledger;
use market_data::{
    BroadcastConfig, BroadcastSink, Broadcaster, CandleConfig, CandleService, CandleStore,
    MarketDataWorker,
};
use matching_engine::{MatchConfig, MatchWorkers, MatchingEngine};
use order_store::{OrderStore, TradeStore};
use parking_lot::Mutex;
use std::sync::Arc;
use submission::{OrderRequest, SubmissionService, SubmitReceipt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;
use types::candle::{Candle, Period};
use types::errors::{CancelError, LedgerError, SubmitError};
use types::events::ExchangeEvent;
use types::ids::{OrderId, Symbol, UserId};
use types::numeric::{Cash, Price};
use types::order::Order;
use types::trade::Trade;
use work_queue::{RetryConfig, WorkQueues};

pub use submission::OrderRequest as SubmitRequest;

/// Top-level configuration with defaults for every tunable
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub retry: RetryConfig,
    pub matching: MatchConfig,
    pub candles: CandleConfig,
    pub broadcast: BroadcastConfig,
    /// Subscriber channel capacity
    pub event_capacity: usize,
}

impl CoreConfig {
    fn event_capacity(&self) -> usize {
        if self.event_capacity == 0 {
            1024
        } else {
            self.event_capacity
        }
    }
}

/// Account snapshot returned by `get_account`
#[derive(Debug, Clone, PartialEq)]
pub struct AccountView {
    pub cash_total: Cash,
    pub cash_reserved: Cash,
    pub cash_available: Cash,
    pub positions: Vec<types::account::Position>,
}

/// The assembled exchange core
pub struct Exchange {
    ledger: Arc<Ledger>,
    orders: Arc<OrderStore>,
    trades: Arc<TradeStore>,
    queues: Arc<WorkQueues>,
    submission: SubmissionService,
    candles: Arc<CandleService>,
    sink: Arc<BroadcastSink>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Exchange {
    /// Build and start the core; spawns the worker tasks
    pub fn start(config: CoreConfig) -> Self {
        // Leaves
        let ledger = Arc::new(Ledger::new());
        let orders = Arc::new(OrderStore::new());
        let trades = Arc::new(TradeStore::new());
        let queues = WorkQueues::new(config.retry.clone());
        let candle_store = Arc::new(CandleStore::new());

        // Services over the leaves
        let submission = SubmissionService::new(
            Arc::clone(&ledger),
            Arc::clone(&orders),
            Arc::clone(&queues),
        );
        let engine = Arc::new(MatchingEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&orders),
            Arc::clone(&trades),
            Arc::clone(&queues),
            config.matching.clone(),
        ));
        let candles = Arc::new(CandleService::new(candle_store, config.candles.clone()));
        let sink = BroadcastSink::new(config.event_capacity());
        let broadcaster = Broadcaster::new(
            Arc::clone(&sink) as Arc<dyn market_data::EventSink>,
            config.broadcast.clone(),
        );

        // Workers
        let match_workers = MatchWorkers::new(engine, Arc::clone(&queues));
        let md_worker = MarketDataWorker::new(
            Arc::clone(&candles),
            Arc::clone(&trades),
            Arc::clone(&queues),
            broadcaster,
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(match_workers.run()),
            tokio::spawn(Arc::clone(&md_worker).run_trade_consumer()),
            tokio::spawn(Arc::clone(&md_worker).run_market_consumer()),
            tokio::spawn(md_worker.run_maintenance(shutdown_rx)),
        ];

        info!("exchange core started");
        Self {
            ledger,
            orders,
            trades,
            queues,
            submission,
            candles,
            sink,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    // ── Function-level API ──────────────────────────────────────────

    /// Submit an order; returns `{order_id, PENDING}` once the
    /// reservation is held
    pub fn submit_order(&self, request: OrderRequest) -> Result<SubmitReceipt, SubmitError> {
        self.submission.submit(request)
    }

    /// Cancel an order owned by `user`
    pub fn cancel_order(&self, order_id: OrderId, user: UserId) -> Result<(), CancelError> {
        self.submission.cancel(order_id, user)
    }

    /// The caller's orders, most recent first
    pub fn list_my_orders(&self, user: UserId) -> Vec<Order> {
        self.orders.orders_for_user(user)
    }

    /// The caller's trades, most recent first
    pub fn list_my_trades(&self, user: UserId) -> Vec<Trade> {
        self.trades.trades_for_user(user)
    }

    /// Cash balances and positions for one user
    pub fn get_account(&self, user: UserId) -> AccountView {
        let account = self.ledger.get_account(user);
        let (cash_total, cash_reserved) = account
            .map(|a| (a.cash_total, a.cash_reserved))
            .unwrap_or((Cash::ZERO, Cash::ZERO));
        AccountView {
            cash_total,
            cash_reserved,
            cash_available: cash_total.saturating_sub(cash_reserved),
            positions: self.ledger.positions_for(user),
        }
    }

    /// Chronological candles for charting
    pub fn get_candles(&self, symbol: &Symbol, period: Period, limit: usize) -> Vec<Candle> {
        self.candles.get_candles(symbol, period, limit)
    }

    /// Subscribe to the outbound event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.sink.subscribe()
    }

    // ── Funding hooks for the account-provisioning collaborator ────

    /// Credit cash into a user's account
    pub fn deposit_cash(&self, user: UserId, amount: Cash) -> Result<(), LedgerError> {
        self.ledger.deposit_cash(user, amount)
    }

    /// Credit shares into a user's position
    pub fn deposit_shares(
        &self,
        user: UserId,
        symbol: &Symbol,
        qty: u64,
        cost: Option<Price>,
    ) -> Result<(), LedgerError> {
        self.ledger.deposit_shares(user, symbol, qty, cost)
    }

    /// Clear an account's quarantine flag after manual review
    pub fn release_quarantine(&self, user: UserId) {
        self.ledger.release_quarantine(user)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Stop workers: queues drain, consumers end, maintenance stops
    pub async fn shutdown(&self) {
        self.queues.close_all();
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("exchange core stopped");
    }

    /// Direct ledger access for audits and property checks
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Work-queue access for administrative operations
    pub fn queues(&self) -> &Arc<WorkQueues> {
        &self.queues
    }
}
