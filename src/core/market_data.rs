use crate::core::config::ConnectorSettings;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::ws::{backoff_delay, ReconnectWs, TungsteniteWs, WsConfig, WsSession};
use crate::core::order_book::{BookAction, OrderBookTracker};
use crate::core::symbols::SymbolRegistry;
use crate::core::traits::{ExchangeProfile, ExchangeRest};
use crate::core::types::{MarketEvent, OrderBookSnapshot, TradingPair};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

pub type MarketCodec = Arc<dyn WsCodec<Message = MarketEvent>>;
type MarketWs = ReconnectWs<MarketCodec, TungsteniteWs<MarketCodec>>;

const MAX_RESYNC_ATTEMPTS: usize = 3;

/// Public order book and trade feed for one exchange.
///
/// Books are kept in a shared [`OrderBookTracker`]: diffs are applied in
/// sequence, gaps and reconnects trigger a REST snapshot. Failed snapshot
/// fetches are retried with the socket's reconnect backoff.
pub struct MarketDataSource {
    exchange: &'static str,
    ws_url: String,
    incremental_diffs: bool,
    rest: Arc<dyn ExchangeRest>,
    codec: MarketCodec,
    symbols: SymbolRegistry,
    books: Arc<Mutex<OrderBookTracker>>,
    ws_config: WsConfig,
    channel_capacity: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MarketDataSource {
    pub fn new(
        profile: &ExchangeProfile,
        rest: Arc<dyn ExchangeRest>,
        codec: MarketCodec,
        symbols: SymbolRegistry,
        settings: &ConnectorSettings,
    ) -> Self {
        Self {
            exchange: profile.name,
            ws_url: profile.public_ws_url.clone(),
            incremental_diffs: profile.capabilities.incremental_diffs,
            rest,
            codec,
            symbols,
            books: Arc::new(Mutex::new(OrderBookTracker::default())),
            ws_config: WsConfig::from_settings(settings),
            channel_capacity: settings.event_channel_capacity.max(1),
            task: Mutex::new(None),
        }
    }

    /// Snapshot every pair, subscribe to depth and trades, and stream events.
    #[instrument(skip(self, pairs), fields(exchange = self.exchange, pairs = pairs.len()))]
    pub async fn start(
        &self,
        pairs: &[TradingPair],
    ) -> Result<mpsc::Receiver<MarketEvent>, ExchangeError> {
        self.stop();

        let mut symbols = Vec::with_capacity(pairs.len());
        for pair in pairs {
            symbols.push(self.symbols.exchange_symbol(pair)?);
        }

        let mut ws = ReconnectWs::new(
            TungsteniteWs::new(
                self.ws_url.clone(),
                self.exchange.to_string(),
                self.codec.clone(),
            )
            .with_config(self.ws_config.clone()),
            self.ws_config.clone(),
        );
        ws.connect().await?;
        ws.subscribe(&self.codec.streams_for(&symbols)).await?;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut feed = BookFeed {
            exchange: self.exchange,
            incremental_diffs: self.incremental_diffs,
            rest: self.rest.clone(),
            symbols: self.symbols.clone(),
            books: self.books.clone(),
            pairs: pairs.to_vec(),
            tx,
            epoch: ws.connection_epoch(),
            retry: self.ws_config.clone(),
        };

        for pair in pairs {
            feed.resync(pair).await;
        }

        info!("market data stream started");
        *self.task.lock() = Some(tokio::spawn(feed.run(ws)));
        Ok(rx)
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            self.books.lock().invalidate_all();
            info!(exchange = self.exchange, "market data stream stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Locally maintained book, if it is currently consistent.
    pub fn order_book(&self, pair: &TradingPair) -> Option<OrderBookSnapshot> {
        self.books.lock().order_book(pair)
    }

    pub fn is_book_valid(&self, pair: &TradingPair) -> bool {
        self.books.lock().is_valid(pair)
    }
}

impl Drop for MarketDataSource {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

struct BookFeed {
    exchange: &'static str,
    incremental_diffs: bool,
    rest: Arc<dyn ExchangeRest>,
    symbols: SymbolRegistry,
    books: Arc<Mutex<OrderBookTracker>>,
    pairs: Vec<TradingPair>,
    tx: mpsc::Sender<MarketEvent>,
    epoch: u64,
    retry: WsConfig,
}

impl BookFeed {
    async fn run(mut self, mut ws: MarketWs) {
        loop {
            let event = match ws.next_message().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    error!(exchange = self.exchange, error = %e, "market data stream lost");
                    break;
                }
                None => break,
            };

            let epoch = ws.connection_epoch();
            if epoch != self.epoch {
                self.epoch = epoch;
                if !self.on_reconnect().await {
                    break;
                }
            }

            if !self.handle(event).await {
                debug!(exchange = self.exchange, "market data receiver dropped");
                break;
            }
        }
        let _ = ws.close().await;
    }

    /// Returns `false` once nobody is listening.
    async fn on_reconnect(&mut self) -> bool {
        info!(exchange = self.exchange, epoch = self.epoch, "reconnected, rebuilding order books");
        self.books.lock().invalidate_all();
        // full-snapshot exchanges rebuild from the next push
        if !self.incremental_diffs {
            return true;
        }
        for pair in self.pairs.clone() {
            if !self.resync(&pair).await {
                return false;
            }
        }
        true
    }

    /// Returns `false` once nobody is listening.
    async fn handle(&mut self, event: MarketEvent) -> bool {
        match event {
            MarketEvent::Snapshot(snapshot) => {
                let action = self.books.lock().on_snapshot(&snapshot);
                if action == BookAction::ResyncRequired {
                    let pair = snapshot.trading_pair.clone();
                    if !self.forward(MarketEvent::Snapshot(snapshot)).await {
                        return false;
                    }
                    return self.resync(&pair).await;
                }
                self.forward(MarketEvent::Snapshot(snapshot)).await
            }
            MarketEvent::Diff(diff) => {
                let pair = diff.trading_pair.clone();
                let action = self.books.lock().on_diff(diff.clone());
                match action {
                    BookAction::Applied => self.forward(MarketEvent::Diff(diff)).await,
                    BookAction::Ignored | BookAction::Buffered => true,
                    BookAction::ResyncRequired => self.resync(&pair).await,
                }
            }
            trade @ MarketEvent::Trade(_) => self.forward(trade).await,
        }
    }

    async fn forward(&self, event: MarketEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Fetch a REST snapshot and replay buffered diffs on top of it.
    ///
    /// Fetch failures back off and retry up to `max_reconnect_attempts`
    /// times; after that the next diff asks again. Returns `false` once
    /// nobody is listening.
    async fn resync(&mut self, pair: &TradingPair) -> bool {
        let symbol = match self.symbols.exchange_symbol(pair) {
            Ok(symbol) => symbol,
            Err(e) => {
                warn!(%pair, error = %e, "cannot resync unknown pair");
                return true;
            }
        };

        let max_failures = self.retry.max_reconnect_attempts.max(1);
        let mut failures = 0u32;
        let mut inconsistent = 0usize;

        loop {
            let fetched = match self.rest.order_book_snapshot(pair, &symbol).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    failures += 1;
                    warn!(%pair, failures, error = %e, "order book snapshot failed");
                    None
                }
            };

            let Some(snapshot) = fetched else {
                if failures >= max_failures {
                    warn!(%pair, failures, "giving up on the snapshot until the next diff");
                    self.books.lock().resync_failed(pair);
                    return true;
                }
                let delay = backoff_delay(
                    self.retry.reconnect_base_delay,
                    self.retry.reconnect_max_delay,
                    failures,
                );
                sleep(delay).await;
                continue;
            };

            let action = self.books.lock().on_snapshot(&snapshot);
            debug!(%pair, update_id = snapshot.update_id, ?action, "order book snapshot applied");
            if !self.forward(MarketEvent::Snapshot(snapshot)).await {
                return false;
            }
            if action != BookAction::ResyncRequired {
                return true;
            }

            inconsistent += 1;
            if inconsistent >= MAX_RESYNC_ATTEMPTS {
                warn!(%pair, "order book still inconsistent after resync, waiting for the next diff");
                self.books.lock().resync_failed(pair);
                return true;
            }
        }
    }
}
