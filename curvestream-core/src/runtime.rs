//! Wires the rest of the crate into a running pipeline: one task per upstream connection, one
//! per specialised monitor, and the periodic ticks that drive batching, trade-queue draining and
//! the hot cache's refresh - plus the bounded-timeout sequence that winds all of it back down.
//!
//! Nothing here is required to use the crate's pieces directly; a caller that wants its own task
//! topology is free to drive [`crate::stream::StreamManager`], [`crate::handler::TradeHandler`]
//! and [`crate::db::BatchWriter`] by hand. [`Pipeline`] is the batteries-included assembly this
//! codebase's own binaries are expected to run.

use crate::bus::EventBus;
use crate::config::Config;
use crate::db::{BatchWriter, CacheEntry, HotCache, PgRepository, Repository};
use crate::error::CoreError;
use crate::handler::{HandlerConfig, TradeHandler};
use crate::monitors::{BondingCurveCompletionMonitor, PoolCreationMonitor};
use crate::parser::{self, Event};
use crate::stream::{RawFrame, StreamClient, StreamManager};
use curvestream_integration::reconnect::BackoffPolicy;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How long a 1 s tick is allowed to drift; also the cadence at which pending trades are drained
/// from the handler into the batch writer's queue.
const TRADE_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence at which the hot cache is repopulated from recently created tokens.
const CACHE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on how long graceful shutdown waits for in-flight work before giving up and
/// logging whatever is still queued.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A running assembly of the ingestion pipeline: the event bus, one upstream connection, the
/// trade handler and its persistence machinery, and the specialised pool-creation /
/// bonding-curve-completion monitors layered on top of it.
///
/// Generic over the upstream transport (`C`) and the data-access implementation (`R`) so tests
/// can substitute a replay fixture and an in-memory repository for the production gRPC client and
/// `PgRepository`.
pub struct Pipeline<R: Repository + 'static, C: StreamClient + 'static> {
    bus: Arc<EventBus>,
    stream_manager: Arc<StreamManager<C>>,
    handler: Arc<TradeHandler<R>>,
    repository: Arc<R>,
    batch_writer: Arc<BatchWriter>,
    cache: Arc<HotCache>,
    pool_creation_monitor: Arc<PoolCreationMonitor<R>>,
    bc_completion_monitor: Arc<BondingCurveCompletionMonitor<R>>,
    config: Config,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    /// Frames forwarded off `stream.data` by the subscription registered in [`Pipeline::new`].
    /// Taken by [`Pipeline::run`]; a `Pipeline` is only ever run once.
    frame_rx: parking_lot::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<RawFrame>>>,
}

impl<C: StreamClient + 'static> Pipeline<PgRepository, C> {
    /// Open a Postgres pool sized per `config` and assemble a pipeline backed by it. The pool,
    /// the batch writer and every in-process component share the single [`EventBus`] this
    /// constructs.
    pub async fn connect(config: Config, client: Arc<C>) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .idle_timeout(config.idle_timeout)
            .acquire_timeout(config.connection_timeout)
            .connect(&config.database_url)
            .await?;

        let repository = Arc::new(PgRepository::new(pool.clone()));
        let batch_writer = Arc::new(BatchWriter::new(pool, config.batch_size));
        Ok(Self::new(config, client, repository, batch_writer))
    }
}

impl<R: Repository + 'static, C: StreamClient + 'static> Pipeline<R, C> {
    /// Assemble a pipeline from an already-constructed repository and batch writer. Used
    /// directly by [`Pipeline::connect`] and by tests wiring in fakes.
    ///
    /// Registers the `stream.data` forwarding subscription before the bus is shared out, since
    /// [`crate::bus::Topic::subscribe`] takes `&mut self` and every other component only ever
    /// sees the bus behind an `Arc`.
    pub fn new(config: Config, client: Arc<C>, repository: Arc<R>, batch_writer: Arc<BatchWriter>) -> Self {
        let (frame_tx, frame_rx) = tokio::sync::mpsc::unbounded_channel::<RawFrame>();
        let mut bus = EventBus::new();
        bus.stream_data.subscribe(move |event: &crate::bus::StreamDataEvent| {
            frame_tx
                .send(event.frame.clone())
                .map_err(|err| -> Box<dyn std::error::Error + Send + Sync> { Box::new(std::io::Error::other(err.to_string())) })
        });
        let bus = Arc::new(bus);
        let cache = Arc::new(HotCache::new());
        let handler_config = HandlerConfig {
            bc_save_threshold_usd: config.bc_save_threshold_usd,
            amm_save_threshold_usd: config.amm_save_threshold_usd,
            save_all_tokens: config.save_all_tokens,
        };
        let handler = Arc::new(TradeHandler::new(
            bus.clone(),
            repository.clone(),
            cache.clone(),
            batch_writer.clone(),
            handler_config,
            0.0,
        ));
        let policy = BackoffPolicy::new(config.reconnect_delay, config.max_reconnect_delay, 2);
        let stream_manager = Arc::new(StreamManager::new(1, client, bus.clone(), policy));
        let pool_creation_monitor = Arc::new(PoolCreationMonitor::new(handler.clone()));
        let bc_completion_monitor = Arc::new(BondingCurveCompletionMonitor::new(handler.clone()));
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            bus,
            stream_manager,
            handler,
            repository,
            batch_writer,
            cache,
            pool_creation_monitor,
            bc_completion_monitor,
            config,
            stop_tx,
            stop_rx,
            frame_rx: parking_lot::Mutex::new(Some(frame_rx)),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn handler(&self) -> &Arc<TradeHandler<R>> {
        &self.handler
    }

    /// Run the pipeline until [`Pipeline::shutdown`] is called from another task, or until this
    /// future is dropped. Spawns one task per upstream connection and per periodic concern, then
    /// waits for all of them to observe the stop signal before returning.
    ///
    /// # Panics
    /// Panics if called more than once on the same `Pipeline` - the frame-forwarding receiver
    /// registered in [`Pipeline::new`] can only be taken once.
    pub async fn run(&self) {
        let frame_task = self.spawn_frame_dispatch_task();

        let stream_task = {
            let manager = self.stream_manager.clone();
            let stop_rx = self.stop_rx.clone();
            tokio::spawn(async move { manager.run(stop_rx).await })
        };
        let batch_task = self.spawn_batch_flush_task();
        let drain_task = self.spawn_trade_drain_task();
        let cache_task = self.spawn_cache_refresh_task();

        let _ = tokio::join!(frame_task, stream_task, batch_task, drain_task, cache_task);
    }

    /// Drain frames forwarded off `stream.data`, decoding each into zero-or-more events and
    /// routing them both to the handler's ordinary trade path and to the specialised monitors.
    /// Each collaborator decodes the frame independently - the monitors watch for a narrower
    /// event kind than trade instructions, so the modest cost of decoding a frame more than once
    /// is preferable to threading a shared parse result through three independently evolving
    /// consumers.
    fn spawn_frame_dispatch_task(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self
            .frame_rx
            .lock()
            .take()
            .expect("Pipeline::run must only be called once");
        let handler = self.handler.clone();
        let pool_creation = self.pool_creation_monitor.clone();
        let bc_completion = self.bc_completion_monitor.clone();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                for event in parser::parse(&frame) {
                    match event {
                        Event::BcTrade(trade) => {
                            if let Err(err) = handler.handle_bc_trade(trade).await {
                                error!(%err, "failed to handle bonding-curve trade");
                            }
                        }
                        Event::AmmTrade(trade) => {
                            if let Err(err) = handler.handle_amm_trade(trade).await {
                                error!(%err, "failed to handle amm trade");
                            }
                        }
                        Event::BcAccountUpdate(_) | Event::PoolCreated(_) => {}
                    }
                }
                pool_creation.on_frame(&frame).await;
                bc_completion.on_frame(&frame).await;
            }
        });
    }

    /// Periodic tick flushing the batch writer's queue: every [`Config::batch_interval`], and
    /// immediately whenever the queue has already grown past `batch_size` between ticks.
    fn spawn_batch_flush_task(&self) -> tokio::task::JoinHandle<()> {
        let batch_writer = self.batch_writer.clone();
        let interval = self.config.batch_interval;
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = batch_writer.flush().await {
                            error!(%err, "periodic batch flush failed");
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Periodic tick draining the handler's pending-trades buffer into the batch writer's queue.
    fn spawn_trade_drain_task(&self) -> tokio::task::JoinHandle<()> {
        let handler = self.handler.clone();
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TRADE_DRAIN_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        handler.flush_pending_trades();
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Periodic tick repopulating the hot cache from tokens created within its retention window.
    fn spawn_cache_refresh_task(&self) -> tokio::task::JoinHandle<()> {
        let repository = self.repository.clone();
        let cache = self.cache.clone();
        let window = CACHE_REFRESH_INTERVAL;
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let since = chrono::Utc::now() - chrono::Duration::seconds(2 * 60 * 60);
                        match repository.find_tokens_created_since(since).await {
                            Ok(tokens) => {
                                let rows = tokens.into_iter().map(|t| {
                                    let entry = CacheEntry {
                                        tracked: true,
                                        first_seen: t.created_at,
                                        threshold_crossed: t.threshold_crossed_at.is_some(),
                                    };
                                    (t.mint_address, entry)
                                });
                                cache.refresh(rows);
                            }
                            Err(err) => error!(%err, "hot cache refresh query failed"),
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Drive the bounded shutdown sequence: stop admitting new subscriptions, signal every
    /// spawned task to stop, wait up to [`SHUTDOWN_TIMEOUT`] for the final trade drain and batch
    /// flush to land, and log (without blocking further) anything still queued once the timeout
    /// elapses.
    pub async fn shutdown(&self) {
        info!("pipeline shutdown requested");
        let _ = self.stop_tx.send(true);

        let drained = self.handler.flush_pending_trades();
        info!(drained, "final trade drain before shutdown");

        let final_flush = async {
            loop {
                match self.batch_writer.flush().await {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        error!(%err, "final batch flush failed during shutdown");
                        break;
                    }
                }
            }
        };

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, final_flush).await.is_err() {
            warn!(
                remaining = self.batch_writer.queue_len(),
                "shutdown timed out with items still queued, dropping them"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MintAddress;

    #[test]
    fn cache_refresh_row_mapping_marks_threshold_crossed_tokens() {
        let cache = HotCache::new();
        let now = chrono::Utc::now();
        let entry = CacheEntry {
            tracked: true,
            first_seen: now,
            threshold_crossed: true,
        };
        cache.refresh(vec![(MintAddress::new("Mint1".into()), entry)]);
        let fetched = cache.get(&MintAddress::new("Mint1".into())).expect("just inserted");
        assert!(fetched.threshold_crossed);
    }
}
