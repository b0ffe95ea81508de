use crate::core::config::ConnectorSettings;
use crate::core::errors::ExchangeError;
use crate::core::kernel::clock::Clock;
use crate::core::kernel::signer::Signer;
use crate::core::market_data::{MarketCodec, MarketDataSource};
use crate::core::symbols::{SymbolMap, SymbolRegistry};
use crate::core::tracker::{
    ClientOrderIdGenerator, InFlightOrder, OrderLifecycleTracker, UpdateSource,
};
use crate::core::traits::{ExchangeProfile, ExchangeRest};
use crate::core::types::{
    Balance, CancellationResult, FillReport, MarketEvent, OrderBookSnapshot, OrderEvent,
    OrderIntent, OrderState, OrderType, PlaceOrderAck, TradingPair, TradingRule, UserEvent,
};
use crate::core::user_stream::{UserCodec, UserStreamSource};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Everything an exchange module supplies to build an adapter.
pub struct AdapterComponents {
    pub profile: ExchangeProfile,
    /// Shared with the codecs, which resolve pushed symbols through it
    pub symbols: SymbolRegistry,
    pub rest: Arc<dyn ExchangeRest>,
    pub market_codec: MarketCodec,
    /// `None` for exchanges without a private stream, or read-only use
    pub user_codec: Option<UserCodec>,
    pub signer: Option<Arc<dyn Signer>>,
    pub clock: Arc<dyn Clock>,
    pub settings: ConnectorSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorStatus {
    pub symbols_ready: bool,
    pub order_books_ready: bool,
    pub user_stream_ready: bool,
    pub trading_enabled: bool,
}

/// Canonical trading interface over one exchange.
pub struct ExchangeAdapter {
    profile: ExchangeProfile,
    rest: Arc<dyn ExchangeRest>,
    symbols: SymbolRegistry,
    rules: RwLock<Arc<HashMap<TradingPair, TradingRule>>>,
    tracker: Mutex<OrderLifecycleTracker>,
    balances: Mutex<BTreeMap<String, Balance>>,
    events: broadcast::Sender<OrderEvent>,
    market_data: MarketDataSource,
    user_stream: Option<UserStreamSource>,
    clock: Arc<dyn Clock>,
    settings: ConnectorSettings,
    /// Without a signer the adapter serves market data only
    has_credentials: bool,
    pairs: Mutex<Vec<TradingPair>>,
    last_balance_refresh: AtomicI64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ExchangeAdapter {
    pub fn new(components: AdapterComponents) -> Self {
        let AdapterComponents {
            profile,
            symbols,
            rest,
            market_codec,
            user_codec,
            signer,
            clock,
            settings,
        } = components;

        let has_credentials = signer.is_some();
        let (events, _) = broadcast::channel(settings.event_channel_capacity.max(1));
        let ids = ClientOrderIdGenerator::new(
            profile.client_order_id_prefix,
            profile.max_client_order_id_len,
        );
        let tracker = OrderLifecycleTracker::new(ids, events.clone(), &settings);
        let market_data = MarketDataSource::new(
            &profile,
            rest.clone(),
            market_codec,
            symbols.clone(),
            &settings,
        );
        let user_stream = match (profile.user_stream.clone(), user_codec) {
            (Some(model), Some(codec)) => Some(UserStreamSource::new(
                profile.name,
                model,
                rest.clone(),
                codec,
                signer,
                clock.clone(),
                &settings,
            )),
            _ => None,
        };

        Self {
            profile,
            rest,
            symbols,
            rules: RwLock::new(Arc::new(HashMap::new())),
            tracker: Mutex::new(tracker),
            balances: Mutex::new(BTreeMap::new()),
            events,
            market_data,
            user_stream,
            clock,
            settings,
            has_credentials,
            pairs: Mutex::new(Vec::new()),
            last_balance_refresh: AtomicI64::new(i64::MIN),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.profile.name
    }

    pub fn profile(&self) -> &ExchangeProfile {
        &self.profile
    }

    pub fn symbols(&self) -> &SymbolRegistry {
        &self.symbols
    }

    /// Reload symbols and trading rules; both are swapped in whole.
    #[instrument(skip(self), fields(exchange = self.profile.name))]
    pub async fn refresh_metadata(&self) -> Result<(), ExchangeError> {
        let info = self.rest.exchange_info().await?;
        let rules: HashMap<_, _> = info
            .rules
            .into_iter()
            .map(|rule| (rule.trading_pair.clone(), rule))
            .collect();
        let map = SymbolMap::from_entries(info.symbols);
        info!(symbols = map.len(), rules = rules.len(), "exchange metadata refreshed");

        self.symbols.replace(map);
        *self.rules.write() = Arc::new(rules);
        Ok(())
    }

    /// Start market data, the private stream and the poll loop.
    ///
    /// Returns the public market event stream for `pairs`.
    pub async fn start(
        self: &Arc<Self>,
        pairs: &[TradingPair],
    ) -> Result<mpsc::Receiver<MarketEvent>, ExchangeError> {
        self.stop();
        if !self.symbols.is_ready() {
            self.refresh_metadata().await?;
        }
        *self.pairs.lock() = pairs.to_vec();

        let market_events = self.market_data.start(pairs).await?;
        let mut tasks = Vec::new();

        if let Some(user_stream) = &self.user_stream {
            let symbols = pairs
                .iter()
                .map(|pair| self.symbols.exchange_symbol(pair))
                .collect::<Result<Vec<_>, _>>()?;
            let mut user_events = user_stream.start(symbols);
            let adapter = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = user_events.recv().await {
                    adapter.apply_user_event(event);
                }
            }));
        }

        let adapter = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(adapter.settings.short_poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = adapter.poll_once().await {
                    warn!(exchange = adapter.profile.name, error = %e, "status poll reported a fault");
                }
            }
        }));

        *self.tasks.lock() = tasks;
        info!(exchange = self.profile.name, pairs = pairs.len(), "connector started");
        Ok(market_events)
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.market_data.stop();
        if let Some(user_stream) = &self.user_stream {
            user_stream.stop();
        }
    }

    pub fn order_events(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ConnectorStatus {
        let pairs = self.pairs.lock().clone();
        let user_stream_ready = self.user_stream.as_ref().map_or(true, UserStreamSource::is_ready);
        ConnectorStatus {
            symbols_ready: self.symbols.is_ready(),
            order_books_ready: !pairs.is_empty()
                && pairs.iter().all(|p| self.market_data.is_book_valid(p)),
            user_stream_ready,
            trading_enabled: self.trading_enabled(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.has_credentials
    }

    fn trading_enabled(&self) -> bool {
        self.has_credentials
            && self.symbols.is_ready()
            && self
                .user_stream
                .as_ref()
                .map_or(true, |stream| !stream.is_failed())
    }

    fn stream_fresh(&self, now: i64) -> bool {
        self.user_stream.as_ref().is_some_and(|stream| {
            stream.is_fresh(now, self.settings.stream_staleness_ms as i64)
        })
    }

    pub fn get_trading_rules(&self) -> Vec<TradingRule> {
        let mut rules: Vec<_> = self.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.trading_pair.cmp(&b.trading_pair));
        rules
    }

    pub fn trading_rule(&self, pair: &TradingPair) -> Option<TradingRule> {
        self.rules.read().get(pair).cloned()
    }

    /// Round `price` down to the pair's price increment.
    pub fn quantize_price(&self, pair: &TradingPair, price: Decimal) -> Decimal {
        match self.trading_rule(pair) {
            Some(rule) => quantize(price, rule.min_price_increment),
            None => price,
        }
    }

    /// Round `amount` down to the pair's base increment.
    pub fn quantize_amount(&self, pair: &TradingPair, amount: Decimal) -> Decimal {
        match self.trading_rule(pair) {
            Some(rule) => quantize(amount, rule.min_base_amount_increment),
            None => amount,
        }
    }

    fn check_order(&self, intent: &mut OrderIntent) -> Result<(), ExchangeError> {
        if intent.amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidParameters(
                "order amount must be positive".to_string(),
            ));
        }
        if intent.order_type != OrderType::Market && intent.price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidParameters(
                "limit orders need a positive price".to_string(),
            ));
        }

        let Some(rule) = self.trading_rule(&intent.trading_pair) else {
            return Ok(());
        };
        intent.amount = quantize(intent.amount, rule.min_base_amount_increment);
        if intent.order_type != OrderType::Market {
            intent.price = quantize(intent.price, rule.min_price_increment);
        }

        if intent.amount < rule.min_order_size {
            return Err(ExchangeError::InvalidParameters(format!(
                "amount {} is below the minimum order size {} for {}",
                intent.amount, rule.min_order_size, intent.trading_pair
            )));
        }
        if intent.order_type != OrderType::Market
            && intent.amount * intent.price < rule.min_notional
        {
            return Err(ExchangeError::InvalidParameters(format!(
                "notional {} is below the minimum {} for {}",
                intent.amount * intent.price,
                rule.min_notional,
                intent.trading_pair
            )));
        }
        Ok(())
    }

    /// Register the order, send it, and record the outcome.
    #[instrument(skip(self, intent), fields(exchange = self.profile.name, pair = %intent.trading_pair, side = %intent.side))]
    pub async fn place_order(&self, mut intent: OrderIntent) -> Result<PlaceOrderAck, ExchangeError> {
        if !self.has_credentials {
            return Err(ExchangeError::AuthError(format!(
                "{} adapter has no API credentials",
                self.profile.name
            )));
        }
        if !self.trading_enabled() {
            return Err(ExchangeError::NotReady(format!(
                "{} order placement is disabled",
                self.profile.name
            )));
        }
        let symbol = self.symbols.exchange_symbol(&intent.trading_pair)?;
        self.check_order(&mut intent)?;

        let order = self.tracker.lock().submit(intent, self.clock.now_ms());
        let result = self.rest.place_order(&order, &symbol).await;
        self.tracker
            .lock()
            .on_place_result(&order.client_order_id, result.as_ref());

        let ack = result?;
        info!(
            client_order_id = %ack.client_order_id,
            exchange_order_id = %ack.exchange_order_id,
            "order placed"
        );
        Ok(ack)
    }

    /// `Ok(true)` once the order is known to be canceled.
    #[instrument(skip(self), fields(exchange = self.profile.name))]
    pub async fn cancel_order(&self, client_order_id: &str) -> Result<bool, ExchangeError> {
        let order = self
            .tracker
            .lock()
            .get(client_order_id)
            .cloned()
            .ok_or_else(|| {
                ExchangeError::InvalidParameters(format!("unknown client order id {client_order_id}"))
            })?;

        match order.state {
            OrderState::Canceled => return Ok(true),
            OrderState::Filled | OrderState::Failed => return Ok(false),
            _ => {}
        }
        if order.exchange_order_id.is_none() {
            return Err(ExchangeError::NotReady(format!(
                "order {client_order_id} has not been acknowledged yet"
            )));
        }

        let symbol = self.symbols.exchange_symbol(&order.trading_pair)?;
        let result = self.rest.cancel_order(&order, &symbol).await;
        self.tracker
            .lock()
            .on_cancel_result(client_order_id, result, self.clock.now_ms())
    }

    /// Cancel every live order, batching per pair where supported.
    ///
    /// Orders not confirmed canceled within `limit` are reported unsuccessful.
    #[instrument(skip(self), fields(exchange = self.profile.name))]
    pub async fn cancel_all(&self, limit: Duration) -> Vec<CancellationResult> {
        let orders = self.tracker.lock().active_orders();
        let ids: Vec<String> = orders.iter().map(|o| o.client_order_id.clone()).collect();

        let mut by_pair: HashMap<TradingPair, Vec<InFlightOrder>> = HashMap::new();
        for order in orders {
            by_pair
                .entry(order.trading_pair.clone())
                .or_default()
                .push(order);
        }

        let work = join_all(by_pair.into_iter().map(|(pair, orders)| self.cancel_group(pair, orders)));
        if timeout(limit, work).await.is_err() {
            warn!(orders = ids.len(), "cancel_all timed out");
        }

        let tracker = self.tracker.lock();
        ids.into_iter()
            .map(|id| {
                let success = tracker
                    .get(&id)
                    .is_some_and(|order| order.state == OrderState::Canceled);
                CancellationResult {
                    client_order_id: id,
                    success,
                }
            })
            .collect()
    }

    async fn cancel_group(&self, pair: TradingPair, orders: Vec<InFlightOrder>) {
        if self.profile.capabilities.batch_cancel {
            match self.batch_cancel(&pair, &orders).await {
                Ok(()) => return,
                Err(e) => warn!(%pair, error = %e, "batch cancel failed, falling back to single cancels"),
            }
        }

        let cancels = orders
            .iter()
            .filter(|order| order.exchange_order_id.is_some())
            .map(|order| self.cancel_order(&order.client_order_id));
        for (order, result) in orders.iter().zip(join_all(cancels).await) {
            if let Err(e) = result {
                warn!(client_order_id = %order.client_order_id, error = %e, "cancel failed");
            }
        }
    }

    async fn batch_cancel(
        &self,
        pair: &TradingPair,
        orders: &[InFlightOrder],
    ) -> Result<(), ExchangeError> {
        let symbol = self.symbols.exchange_symbol(pair)?;
        let acknowledged: Vec<InFlightOrder> = orders
            .iter()
            .filter(|order| order.exchange_order_id.is_some())
            .cloned()
            .collect();
        if acknowledged.is_empty() {
            return Ok(());
        }

        let results = self.rest.cancel_orders(&symbol, &acknowledged).await?;
        let now = self.clock.now_ms();
        let mut tracker = self.tracker.lock();
        for result in results {
            // refused cancels stay live and are reported unsuccessful
            match tracker.on_cancel_result(&result.client_order_id, Ok(result.success), now) {
                Ok(true) => {}
                Ok(false) => warn!(client_order_id = %result.client_order_id, "batch cancel refused"),
                Err(e) => warn!(client_order_id = %result.client_order_id, error = %e, "batch cancel result not applied"),
            }
        }
        Ok(())
    }

    /// Fetch balances and replace the local table; assets absent remotely
    /// are dropped.
    #[instrument(skip(self), fields(exchange = self.profile.name))]
    pub async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let remote = self.rest.balances().await?;
        self.last_balance_refresh
            .store(self.clock.now_ms(), Ordering::SeqCst);

        let fresh: BTreeMap<String, Balance> = remote
            .into_iter()
            .map(|balance| (balance.asset.clone(), balance))
            .collect();

        let changed: Vec<Balance> = {
            let mut table = self.balances.lock();
            let removed: Vec<&String> = table.keys().filter(|a| !fresh.contains_key(*a)).collect();
            if !removed.is_empty() {
                debug!(?removed, "assets no longer reported, dropping");
            }
            let changed = fresh
                .values()
                .filter(|b| table.get(&b.asset) != Some(*b))
                .cloned()
                .collect();
            *table = fresh;
            changed
        };

        for balance in changed {
            let _ = self.events.send(OrderEvent::BalanceUpdate(balance));
        }
        Ok(self.balances.lock().values().cloned().collect())
    }

    /// Balances as last refreshed or pushed
    pub fn cached_balances(&self) -> Vec<Balance> {
        self.balances.lock().values().cloned().collect()
    }

    /// Local book when consistent, otherwise a REST snapshot.
    pub async fn get_order_book(&self, pair: &TradingPair) -> Result<OrderBookSnapshot, ExchangeError> {
        if let Some(book) = self.market_data.order_book(pair) {
            return Ok(book);
        }
        let symbol = self.symbols.exchange_symbol(pair)?;
        self.rest.order_book_snapshot(pair, &symbol).await
    }

    pub async fn get_last_traded_prices(
        &self,
        pairs: &[TradingPair],
    ) -> Result<HashMap<TradingPair, Decimal>, ExchangeError> {
        let prices = self.rest.last_traded_prices().await?;
        let symbols = self.symbols.snapshot();
        Ok(pairs
            .iter()
            .filter_map(|pair| {
                let symbol = symbols.exchange_symbol(pair)?;
                prices.get(symbol).map(|price| (pair.clone(), *price))
            })
            .collect())
    }

    pub fn in_flight_orders(&self) -> Vec<InFlightOrder> {
        self.tracker.lock().live_orders().cloned().collect()
    }

    pub fn order(&self, client_order_id: &str) -> Option<InFlightOrder> {
        self.tracker.lock().get(client_order_id).cloned()
    }

    fn apply_user_event(&self, event: UserEvent) {
        match event {
            UserEvent::Order(update) => {
                let outcome = self
                    .tracker
                    .lock()
                    .process_order_update(update, UpdateSource::Push);
                debug!(?outcome, "push order update");
            }
            UserEvent::Trade(trade) => {
                self.tracker.lock().process_trade_update(trade);
            }
            UserEvent::Balance(balance) => {
                self.balances
                    .lock()
                    .insert(balance.asset.clone(), balance.clone());
                let _ = self.events.send(OrderEvent::BalanceUpdate(balance));
            }
        }
    }

    /// One reconciliation pass: order status, fills and (when due) balances.
    ///
    /// Every due order is processed; the first unclassified fault is returned.
    #[instrument(skip(self), fields(exchange = self.profile.name))]
    pub async fn poll_once(&self) -> Result<(), ExchangeError> {
        let now = self.clock.now_ms();
        let due = self
            .tracker
            .lock()
            .orders_to_poll(now, self.stream_fresh(now));
        let mut fault = None;

        let statuses = join_all(due.iter().map(|order| async move {
            let symbol = self.symbols.exchange_symbol(&order.trading_pair)?;
            self.rest.order_status(order, &symbol).await
        }))
        .await;

        for (order, status) in due.iter().zip(statuses) {
            let mut tracker = self.tracker.lock();
            match status {
                Ok(update) => {
                    tracker.process_order_update(update, UpdateSource::Poll);
                }
                Err(e) => {
                    if let Some(e) = tracker.on_status_error(&order.client_order_id, e, now) {
                        fault.get_or_insert(e);
                    }
                }
            }
        }

        let polled: HashSet<&str> = due.iter().map(|o| o.client_order_id.as_str()).collect();
        let needing_fills: Vec<InFlightOrder> = self
            .tracker
            .lock()
            .orders_needing_fills()
            .into_iter()
            .filter(|o| polled.contains(o.client_order_id.as_str()) || o.is_done())
            .collect();

        for order in &needing_fills {
            if let Err(e) = self.reconcile_fills(order).await {
                if !(e.is_transient() || e.is_rate_limited()) {
                    fault.get_or_insert(e);
                }
            }
        }

        let refresh_ms = self.settings.balance_refresh_interval_ms as i64;
        let last = self.last_balance_refresh.load(Ordering::SeqCst);
        let balances_due = last == i64::MIN || now.saturating_sub(last) >= refresh_ms;
        if self.has_credentials && balances_due {
            if let Err(e) = self.get_balances().await {
                warn!(error = %e, "balance refresh failed");
            }
        }

        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Book the fills reported for `order`, then let the tracker settle it
    /// if it had already closed when the pass started.
    async fn reconcile_fills(&self, order: &InFlightOrder) -> Result<(), ExchangeError> {
        let symbol = self.symbols.exchange_symbol(&order.trading_pair)?;
        let report = self.rest.order_fills(order, &symbol).await?;
        let mut tracker = self.tracker.lock();
        match report {
            FillReport::Trades(trades) => {
                for trade in trades {
                    tracker.process_trade_update(trade);
                }
            }
            FillReport::Cumulative(totals) => {
                tracker.process_cumulative_fill(&order.client_order_id, &totals);
            }
        }
        tracker.on_fills_checked(order);
        Ok(())
    }
}

fn quantize(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    ((value / increment).round_dp_with_strategy(0, RoundingStrategy::ToZero) * increment).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quantize_rounds_down() {
        assert_eq!(quantize(dec!(1.23456), dec!(0.01)), dec!(1.23));
        assert_eq!(quantize(dec!(17), dec!(5)), dec!(15));
        assert_eq!(quantize(dec!(0.5), Decimal::ZERO), dec!(0.5));
    }
}
