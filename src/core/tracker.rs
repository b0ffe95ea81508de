use crate::core::config::ConnectorSettings;
use crate::core::errors::ExchangeError;
use crate::core::types::{
    CumulativeFill, OrderEvent, OrderIntent, OrderSide, OrderState, OrderType, OrderUpdate,
    PlaceOrderAck, TradeFee, TradeUpdate, TradingPair,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Local record of an order submitted by this process.
#[derive(Debug, Clone)]
pub struct InFlightOrder {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: TradingPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Decimal,
    pub amount: Decimal,
    pub executed_amount_base: Decimal,
    pub executed_amount_quote: Decimal,
    pub cumulative_fee: Decimal,
    pub state: OrderState,
    pub creation_timestamp: i64,
    pub last_update_timestamp: i64,
    trade_ids: HashSet<String>,
    last_polled_at: Option<i64>,
    push_confirmed_at: Option<i64>,
    closing_fills_checked: bool,
}

impl InFlightOrder {
    pub fn new(client_order_id: String, intent: OrderIntent, created_at: i64) -> Self {
        Self {
            client_order_id,
            exchange_order_id: None,
            trading_pair: intent.trading_pair,
            side: intent.side,
            order_type: intent.order_type,
            price: intent.price,
            amount: intent.amount,
            executed_amount_base: Decimal::ZERO,
            executed_amount_quote: Decimal::ZERO,
            cumulative_fee: Decimal::ZERO,
            state: OrderState::PendingCreate,
            creation_timestamp: created_at,
            last_update_timestamp: created_at,
            trade_ids: HashSet::new(),
            last_polled_at: None,
            push_confirmed_at: None,
            closing_fills_checked: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn remaining_amount(&self) -> Decimal {
        (self.amount - self.executed_amount_base).max(Decimal::ZERO)
    }

    pub fn average_fill_price(&self) -> Option<Decimal> {
        (!self.executed_amount_base.is_zero())
            .then(|| self.executed_amount_quote / self.executed_amount_base)
    }

    /// A filled order stays tracked until its fills add up to the amount; a
    /// canceled order that reached the exchange until one fill pass has run
    /// after it closed, since it may have traded before the cancel.
    pub fn fills_reconciled(&self) -> bool {
        match self.state {
            OrderState::Filled => self.executed_amount_base >= self.amount,
            OrderState::Canceled => self.exchange_order_id.is_none() || self.closing_fills_checked,
            _ => true,
        }
    }

    pub fn has_trade(&self, trade_id: &str) -> bool {
        self.trade_ids.contains(trade_id)
    }
}

/// Unique client ids for the lifetime of the process: a random salt picked
/// at start-up plus a sequence seeded from the start-up time.
#[derive(Debug)]
pub struct ClientOrderIdGenerator {
    prefix: String,
    max_len: usize,
    salt: u16,
    sequence: AtomicU64,
}

impl ClientOrderIdGenerator {
    pub fn new(prefix: impl Into<String>, max_len: usize) -> Self {
        let start = chrono::Utc::now().timestamp_micros().unsigned_abs();
        Self {
            prefix: prefix.into(),
            max_len,
            salt: rand::random(),
            sequence: AtomicU64::new(start),
        }
    }

    pub fn next_id(&self, side: OrderSide, pair: &TradingPair) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let side = match side {
            OrderSide::Buy => 'B',
            OrderSide::Sell => 'S',
        };
        let asset = |s: &str| -> String {
            s.chars()
                .filter(char::is_ascii_alphanumeric)
                .take(4)
                .collect()
        };
        let body = format!(
            "{side}{}{}{:04x}{n}",
            asset(&pair.base),
            asset(&pair.quote),
            self.salt
        );

        // keep the tail: the sequence number is what makes the id unique
        let room = self.max_len.saturating_sub(self.prefix.len());
        let body = if body.len() > room {
            &body[body.len() - room..]
        } else {
            body.as_str()
        };
        format!("{}{}", self.prefix, body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    PlaceResponse,
    Push,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Older than the recorded timestamp, or the order is already terminal
    Stale,
    InvalidTransition,
    UnknownOrder,
}

/// Single owner of order state for one connector.
///
/// Place responses, push events and poll results all funnel through
/// [`OrderLifecycleTracker::process_order_update`]: an update is applied only
/// if it is not older than the recorded timestamp and moves the state machine
/// forward. Fills are de-duplicated by trade id.
#[derive(Debug)]
pub struct OrderLifecycleTracker {
    live: HashMap<String, InFlightOrder>,
    completed: HashMap<String, InFlightOrder>,
    completed_order: VecDeque<String>,
    exchange_ids: HashMap<String, String>,
    ids: ClientOrderIdGenerator,
    events: broadcast::Sender<OrderEvent>,
    history_limit: usize,
    short_poll_ms: i64,
    long_poll_ms: i64,
}

impl OrderLifecycleTracker {
    pub fn new(
        ids: ClientOrderIdGenerator,
        events: broadcast::Sender<OrderEvent>,
        settings: &ConnectorSettings,
    ) -> Self {
        Self {
            live: HashMap::new(),
            completed: HashMap::new(),
            completed_order: VecDeque::new(),
            exchange_ids: HashMap::new(),
            ids,
            events,
            history_limit: settings.completed_order_history.max(1),
            short_poll_ms: settings.short_poll_interval_ms as i64,
            long_poll_ms: settings.long_poll_interval_ms as i64,
        }
    }

    /// Register a new order as `PENDING_CREATE` before it is sent.
    pub fn submit(&mut self, intent: OrderIntent, now: i64) -> InFlightOrder {
        let client_order_id = self.ids.next_id(intent.side, &intent.trading_pair);
        let order = InFlightOrder::new(client_order_id, intent, now);
        self.start_tracking(order.clone());
        order
    }

    pub fn start_tracking(&mut self, order: InFlightOrder) {
        debug!(client_order_id = %order.client_order_id, pair = %order.trading_pair, "tracking order");
        if let Some(exchange_id) = &order.exchange_order_id {
            self.exchange_ids
                .insert(exchange_id.clone(), order.client_order_id.clone());
        }
        self.live.insert(order.client_order_id.clone(), order);
    }

    pub fn get(&self, client_order_id: &str) -> Option<&InFlightOrder> {
        self.live
            .get(client_order_id)
            .or_else(|| self.completed.get(client_order_id))
    }

    pub fn live_orders(&self) -> impl Iterator<Item = &InFlightOrder> {
        self.live.values()
    }

    /// Orders that can still be canceled
    pub fn active_orders(&self) -> Vec<InFlightOrder> {
        self.live
            .values()
            .filter(|o| !o.is_done())
            .cloned()
            .collect()
    }

    fn resolve(&self, client_order_id: Option<&str>, exchange_order_id: Option<&str>) -> Option<String> {
        if let Some(id) = client_order_id {
            if self.live.contains_key(id) || self.completed.contains_key(id) {
                return Some(id.to_string());
            }
        }
        exchange_order_id.and_then(|id| self.exchange_ids.get(id).cloned())
    }

    fn bind_exchange_id(&mut self, client_order_id: &str, exchange_order_id: &str) {
        if let Some(order) = self.live.get_mut(client_order_id) {
            if order.exchange_order_id.is_none() {
                order.exchange_order_id = Some(exchange_order_id.to_string());
                self.exchange_ids
                    .insert(exchange_order_id.to_string(), client_order_id.to_string());
            }
        }
    }

    fn emit(&self, event: OrderEvent) {
        // no subscribers is not an error
        let _ = self.events.send(event);
    }

    fn evict_if_done(&mut self, client_order_id: &str) {
        let done = self
            .live
            .get(client_order_id)
            .is_some_and(|o| o.is_done() && o.fills_reconciled());
        if !done {
            return;
        }
        if let Some(order) = self.live.remove(client_order_id) {
            info!(
                client_order_id,
                state = %order.state,
                executed = %order.executed_amount_base,
                "order completed"
            );
            self.completed_order.push_back(order.client_order_id.clone());
            self.completed.insert(order.client_order_id.clone(), order);
        }
        while self.completed_order.len() > self.history_limit {
            if let Some(oldest) = self.completed_order.pop_front() {
                if let Some(order) = self.completed.remove(&oldest) {
                    if let Some(exchange_id) = order.exchange_order_id {
                        self.exchange_ids.remove(&exchange_id);
                    }
                }
            }
        }
    }

    /// Bind the exchange id on success; a failed placement marks the order
    /// `FAILED` unless another source already saw it live.
    ///
    /// The ack moves a pending order to `OPEN` even when the exchange clock
    /// runs behind the local creation time.
    pub fn on_place_result(
        &mut self,
        client_order_id: &str,
        result: Result<&PlaceOrderAck, &ExchangeError>,
    ) -> UpdateOutcome {
        let Some(order) = self.live.get(client_order_id) else {
            return UpdateOutcome::UnknownOrder;
        };
        let trading_pair = order.trading_pair.clone();
        let recorded = order.last_update_timestamp;
        let pending = order.state == OrderState::PendingCreate;

        match result {
            Ok(ack) => {
                self.bind_exchange_id(client_order_id, &ack.exchange_order_id);
                if !pending {
                    debug!(client_order_id, ack_ts = ack.timestamp, "ack after the order was already seen live");
                    return UpdateOutcome::Stale;
                }
                self.process_order_update(
                    OrderUpdate {
                        client_order_id: Some(client_order_id.to_string()),
                        exchange_order_id: Some(ack.exchange_order_id.clone()),
                        trading_pair,
                        new_state: OrderState::Open,
                        update_timestamp: ack.timestamp.max(recorded),
                    },
                    UpdateSource::PlaceResponse,
                )
            }
            Err(error) => {
                if !pending {
                    warn!(client_order_id, error = %error, "place call failed for an order already seen live");
                    return UpdateOutcome::Stale;
                }
                warn!(client_order_id, error = %error, "order placement failed");
                self.process_order_update(
                    OrderUpdate {
                        client_order_id: Some(client_order_id.to_string()),
                        exchange_order_id: None,
                        trading_pair,
                        new_state: OrderState::Failed,
                        update_timestamp: recorded,
                    },
                    UpdateSource::PlaceResponse,
                )
            }
        }
    }

    pub fn process_order_update(
        &mut self,
        update: OrderUpdate,
        source: UpdateSource,
    ) -> UpdateOutcome {
        let Some(client_order_id) = self.resolve(
            update.client_order_id.as_deref(),
            update.exchange_order_id.as_deref(),
        ) else {
            debug!(?update, "update for an order this process does not track");
            return UpdateOutcome::UnknownOrder;
        };

        if self.completed.contains_key(&client_order_id) {
            return UpdateOutcome::Stale;
        }
        if let Some(exchange_id) = &update.exchange_order_id {
            self.bind_exchange_id(&client_order_id, exchange_id);
        }

        let Some(order) = self.live.get_mut(&client_order_id) else {
            return UpdateOutcome::UnknownOrder;
        };

        if source == UpdateSource::Push {
            order.push_confirmed_at = Some(order.push_confirmed_at.map_or(update.update_timestamp, |t| t.max(update.update_timestamp)));
        }

        if update.update_timestamp < order.last_update_timestamp {
            debug!(
                %client_order_id,
                update_ts = update.update_timestamp,
                recorded_ts = order.last_update_timestamp,
                "stale order update discarded"
            );
            return UpdateOutcome::Stale;
        }
        if !order.state.can_transition_to(update.new_state) {
            debug!(%client_order_id, from = %order.state, to = %update.new_state, "invalid transition discarded");
            return if order.is_done() {
                UpdateOutcome::Stale
            } else {
                UpdateOutcome::InvalidTransition
            };
        }

        let changed = order.state != update.new_state;
        order.state = update.new_state;
        order.last_update_timestamp = update.update_timestamp;

        if changed {
            let event = OrderUpdate {
                client_order_id: Some(client_order_id.clone()),
                exchange_order_id: order.exchange_order_id.clone(),
                ..update
            };
            debug!(%client_order_id, state = %event.new_state, ?source, "order state changed");
            self.emit(OrderEvent::OrderUpdate(event));
        }

        self.evict_if_done(&client_order_id);
        UpdateOutcome::Applied
    }

    /// Record a fill. Returns `false` for a trade id already seen.
    pub fn process_trade_update(&mut self, trade: TradeUpdate) -> bool {
        let Some(client_order_id) = self.resolve(
            trade.client_order_id.as_deref(),
            trade.exchange_order_id.as_deref(),
        ) else {
            debug!(trade_id = %trade.trade_id, "fill for an order this process does not track");
            return false;
        };

        let order = match self.live.get_mut(&client_order_id) {
            Some(order) => order,
            None => match self.completed.get_mut(&client_order_id) {
                Some(order) => order,
                None => return false,
            },
        };

        if !order.trade_ids.insert(trade.trade_id.clone()) {
            debug!(trade_id = %trade.trade_id, %client_order_id, "duplicate fill discarded");
            return false;
        }

        order.executed_amount_base += trade.fill_base_amount;
        order.executed_amount_quote += trade.fill_quote_amount;
        order.cumulative_fee += trade.fee.amount;

        let event = TradeUpdate {
            client_order_id: Some(client_order_id.clone()),
            exchange_order_id: trade
                .exchange_order_id
                .clone()
                .or_else(|| order.exchange_order_id.clone()),
            ..trade
        };
        self.emit(OrderEvent::TradeUpdate(event));
        self.evict_if_done(&client_order_id);
        true
    }

    /// Turn cumulative execution totals into a fill for the part not yet
    /// attributed by earlier trade updates.
    pub fn process_cumulative_fill(
        &mut self,
        client_order_id: &str,
        fill: &CumulativeFill,
    ) -> Option<TradeUpdate> {
        let order = self.get(client_order_id)?;
        let delta_base = fill.filled_base - order.executed_amount_base;
        if delta_base <= Decimal::ZERO {
            return None;
        }
        let delta_quote = (fill.filled_quote - order.executed_amount_quote).max(Decimal::ZERO);
        let delta_fee = (fill.fee.amount - order.cumulative_fee).max(Decimal::ZERO);
        let order_ref = order
            .exchange_order_id
            .clone()
            .unwrap_or_else(|| order.client_order_id.clone());

        let trade = TradeUpdate {
            trade_id: format!("{}-{}", order_ref, fill.filled_base.normalize()),
            client_order_id: Some(order.client_order_id.clone()),
            exchange_order_id: order.exchange_order_id.clone(),
            trading_pair: order.trading_pair.clone(),
            fill_price: delta_quote / delta_base,
            fill_base_amount: delta_base,
            fill_quote_amount: delta_quote,
            fee: TradeFee {
                amount: delta_fee,
                asset: fill.fee.asset.clone(),
            },
            fill_timestamp: fill.timestamp,
        };

        self.process_trade_update(trade.clone()).then_some(trade)
    }

    /// Apply the outcome of a cancel request; "not found" means already gone.
    pub fn on_cancel_result(
        &mut self,
        client_order_id: &str,
        result: Result<bool, ExchangeError>,
        now: i64,
    ) -> Result<bool, ExchangeError> {
        match result {
            Ok(true) => {
                self.mark_canceled(client_order_id, now);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(error) if error.is_order_not_found() => {
                debug!(client_order_id, "cancel target not found, treating as canceled");
                self.mark_canceled(client_order_id, now);
                Ok(true)
            }
            Err(error) => Err(error),
        }
    }

    /// Handle a failed status poll. Returns the error when it is neither
    /// transient nor an authoritative "not found".
    pub fn on_status_error(
        &mut self,
        client_order_id: &str,
        error: ExchangeError,
        now: i64,
    ) -> Option<ExchangeError> {
        if error.is_order_not_found() {
            info!(client_order_id, "order not found on exchange, marking canceled");
            self.mark_canceled(client_order_id, now);
            return None;
        }
        if error.is_transient() || error.is_rate_limited() {
            debug!(client_order_id, error = %error, "status poll failed, will retry");
            return None;
        }
        Some(error)
    }

    fn mark_canceled(&mut self, client_order_id: &str, now: i64) {
        let Some(order) = self.live.get(client_order_id) else {
            return;
        };
        let update = OrderUpdate {
            client_order_id: Some(client_order_id.to_string()),
            exchange_order_id: order.exchange_order_id.clone(),
            trading_pair: order.trading_pair.clone(),
            new_state: OrderState::Canceled,
            update_timestamp: now.max(order.last_update_timestamp),
        };
        self.process_order_update(update, UpdateSource::Poll);
    }

    /// Record a fill pass for `checked`, the order as it was when the pass
    /// started. Only a pass begun after the order closed settles it.
    pub fn on_fills_checked(&mut self, checked: &InFlightOrder) {
        if !checked.is_done() {
            return;
        }
        if let Some(order) = self.live.get_mut(&checked.client_order_id) {
            order.closing_fills_checked = true;
        }
        self.evict_if_done(&checked.client_order_id);
    }

    /// Orders due for a status poll at `now`.
    ///
    /// Orders confirmed by a recent push are polled at the long interval while
    /// the private stream is healthy; everything else at the short interval.
    pub fn orders_to_poll(&mut self, now: i64, stream_healthy: bool) -> Vec<InFlightOrder> {
        let (short, long) = (self.short_poll_ms, self.long_poll_ms);
        self.live
            .values_mut()
            .filter(|order| order.exchange_order_id.is_some() && !order.is_done())
            .filter_map(|order| {
                let interval = if stream_healthy && order.push_confirmed_at.is_some() {
                    long
                } else {
                    short
                };
                let due = order
                    .last_polled_at
                    .map_or(true, |polled| now - polled >= interval);
                due.then(|| {
                    order.last_polled_at = Some(now);
                    order.clone()
                })
            })
            .collect()
    }

    /// Orders whose fills may not all be attributed yet.
    pub fn orders_needing_fills(&self) -> Vec<InFlightOrder> {
        self.live
            .values()
            .filter(|o| o.exchange_order_id.is_some())
            .filter(|o| o.state == OrderState::PartiallyFilled || !o.fills_reconciled())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        "BTC-USDT".parse().unwrap()
    }

    fn intent(amount: Decimal) -> OrderIntent {
        OrderIntent {
            trading_pair: pair(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: dec!(10.00),
            amount,
        }
    }

    fn tracker() -> (OrderLifecycleTracker, broadcast::Receiver<OrderEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let tracker = OrderLifecycleTracker::new(
            ClientOrderIdGenerator::new("x-", 32),
            tx,
            &ConnectorSettings::default(),
        );
        (tracker, rx)
    }

    fn update(state: OrderState, ts: i64) -> OrderUpdate {
        OrderUpdate {
            client_order_id: None,
            exchange_order_id: Some("e1".into()),
            trading_pair: pair(),
            new_state: state,
            update_timestamp: ts,
        }
    }

    fn fill(trade_id: &str, amount: Decimal, ts: i64) -> TradeUpdate {
        TradeUpdate {
            trade_id: trade_id.into(),
            client_order_id: None,
            exchange_order_id: Some("e1".into()),
            trading_pair: pair(),
            fill_price: dec!(10.00),
            fill_base_amount: amount,
            fill_quote_amount: amount * dec!(10.00),
            fee: TradeFee::default(),
            fill_timestamp: ts,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<OrderEvent>) -> Vec<OrderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn ack(ts: i64) -> PlaceOrderAck {
        PlaceOrderAck {
            client_order_id: "c1".into(),
            exchange_order_id: "e1".into(),
            timestamp: ts,
        }
    }

    #[test]
    fn test_client_ids_unique_and_bounded() {
        let ids = ClientOrderIdGenerator::new("x-MG43PCSN", 32);
        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            let id = ids.next_id(OrderSide::Sell, &pair());
            assert!(id.len() <= 32);
            assert!(id.starts_with("x-MG43PCSN"));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_fill_then_late_duplicate_is_discarded() {
        let (mut tracker, mut rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(100)), 0));

        assert_eq!(tracker.on_place_result("c1", Ok(&ack(0))), UpdateOutcome::Applied);
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::Open);

        assert!(tracker.process_trade_update(fill("t1", dec!(100), 1_000)));
        tracker.process_order_update(update(OrderState::Filled, 1_000), UpdateSource::Push);
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::Filled);

        // same fill replayed at t=0.5
        assert!(!tracker.process_trade_update(fill("t1", dec!(100), 500)));
        assert_eq!(
            tracker.process_order_update(update(OrderState::PartiallyFilled, 500), UpdateSource::Push),
            UpdateOutcome::Stale
        );

        let order = tracker.get("c1").unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.executed_amount_base, dec!(100));

        let trades = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, OrderEvent::TradeUpdate(_)))
            .count();
        assert_eq!(trades, 1);
    }

    #[test]
    fn test_push_before_ack_is_not_dropped() {
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));

        let early = OrderUpdate {
            client_order_id: Some("c1".into()),
            ..update(OrderState::Open, 5)
        };
        assert_eq!(
            tracker.process_order_update(early, UpdateSource::Push),
            UpdateOutcome::Applied
        );
        assert_eq!(tracker.get("c1").unwrap().exchange_order_id.as_deref(), Some("e1"));

        // ack is older than the push; state stays OPEN and nothing regresses
        assert_eq!(tracker.on_place_result("c1", Ok(&ack(3))), UpdateOutcome::Stale);
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::Open);
    }

    #[test]
    fn test_ack_dated_before_creation_still_opens() {
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 1_000));

        // exchange clock 50ms behind ours
        assert_eq!(tracker.on_place_result("c1", Ok(&ack(950))), UpdateOutcome::Applied);
        let order = tracker.get("c1").unwrap();
        assert_eq!(order.state, OrderState::Open);
        assert_eq!(order.last_update_timestamp, 1_000);

        // a later poll still moves it along
        tracker.process_order_update(update(OrderState::PartiallyFilled, 1_010), UpdateSource::Poll);
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::PartiallyFilled);
    }

    #[test]
    fn test_place_error_marks_failed() {
        let (mut tracker, _rx) = tracker();
        let order = tracker.submit(intent(dec!(1)), 0);
        let error = ExchangeError::ApiError {
            code: 1101,
            message: "insufficient balance".into(),
        };

        tracker.on_place_result(&order.client_order_id, Err(&error));
        assert_eq!(tracker.get(&order.client_order_id).unwrap().state, OrderState::Failed);
        assert_eq!(tracker.active_orders().len(), 0);
    }

    #[test]
    fn test_cancel_not_found_twice_is_success() {
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));
        tracker.on_place_result("c1", Ok(&ack(0)));

        let not_found = || Err(ExchangeError::OrderNotFound("e1".into()));
        assert!(tracker.on_cancel_result("c1", not_found(), 10).unwrap());
        assert!(tracker.on_cancel_result("c1", not_found(), 20).unwrap());
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::Canceled);
    }

    #[test]
    fn test_unclassified_cancel_error_surfaces() {
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));
        tracker.on_place_result("c1", Ok(&ack(0)));

        let result = tracker.on_cancel_result(
            "c1",
            Err(ExchangeError::ApiError {
                code: 9999,
                message: "system busy".into(),
            }),
            10,
        );
        assert!(result.is_err());
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::Open);
    }

    #[test]
    fn test_status_errors() {
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));
        tracker.on_place_result("c1", Ok(&ack(0)));

        assert!(tracker
            .on_status_error("c1", ExchangeError::Timeout("poll".into()), 5)
            .is_none());
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::Open);

        assert!(tracker
            .on_status_error("c1", ExchangeError::AuthError("expired".into()), 6)
            .is_some());

        assert!(tracker
            .on_status_error("c1", ExchangeError::OrderNotFound("e1".into()), 7)
            .is_none());
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::Canceled);
    }

    #[test]
    fn test_cumulative_fill_only_counts_new_amount() {
        let (mut tracker, mut rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(10)), 0));
        tracker.on_place_result("c1", Ok(&ack(0)));

        // 4 already attributed by a push fill
        tracker.process_trade_update(fill("t1", dec!(4), 10));
        drain(&mut rx);

        let total = CumulativeFill {
            filled_base: dec!(6),
            filled_quote: dec!(60),
            fee: TradeFee::default(),
            timestamp: 20,
        };
        let trade = tracker.process_cumulative_fill("c1", &total).unwrap();
        assert_eq!(trade.fill_base_amount, dec!(2));
        assert_eq!(trade.fill_price, dec!(10));

        // same totals on the next poll add nothing
        assert!(tracker.process_cumulative_fill("c1", &total).is_none());
        assert_eq!(tracker.get("c1").unwrap().executed_amount_base, dec!(6));
    }

    #[test]
    fn test_filled_order_kept_until_fills_arrive() {
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(5)), 0));
        tracker.on_place_result("c1", Ok(&ack(0)));
        tracker.process_order_update(update(OrderState::Filled, 10), UpdateSource::Poll);

        assert_eq!(tracker.orders_needing_fills().len(), 1);
        tracker.process_trade_update(fill("t1", dec!(5), 10));
        assert!(tracker.orders_needing_fills().is_empty());
        assert_eq!(tracker.live_orders().count(), 0);
        assert_eq!(tracker.get("c1").unwrap().state, OrderState::Filled);
    }

    #[test]
    fn test_trade_before_cancel_is_booked_once() {
        let (mut tracker, mut rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));
        tracker.on_place_result("c1", Ok(&ack(0)));

        let partial = CumulativeFill {
            filled_base: dec!(0.4),
            filled_quote: dec!(4),
            fee: TradeFee::default(),
            timestamp: 10,
        };
        assert!(tracker.process_cumulative_fill("c1", &partial).is_some());
        tracker.process_order_update(update(OrderState::PartiallyFilled, 10), UpdateSource::Poll);

        // canceled before the last trade was seen
        tracker.on_cancel_result("c1", Ok(true), 20).unwrap();
        let pass_started = tracker.get("c1").unwrap().clone();
        assert_eq!(tracker.live_orders().count(), 1);
        assert_eq!(tracker.orders_needing_fills().len(), 1);
        assert!(tracker.orders_to_poll(1_000_000, false).is_empty());
        drain(&mut rx);

        let closing = CumulativeFill {
            filled_base: dec!(0.6),
            filled_quote: dec!(6),
            fee: TradeFee::default(),
            timestamp: 15,
        };
        let trade = tracker.process_cumulative_fill("c1", &closing).unwrap();
        assert_eq!(trade.fill_base_amount, dec!(0.2));
        tracker.on_fills_checked(&pass_started);

        assert_eq!(tracker.live_orders().count(), 0);
        assert!(tracker.process_cumulative_fill("c1", &closing).is_none());
        let order = tracker.get("c1").unwrap();
        assert_eq!(order.state, OrderState::Canceled);
        assert_eq!(order.executed_amount_base, dec!(0.6));

        let trades = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, OrderEvent::TradeUpdate(_)))
            .count();
        assert_eq!(trades, 1);
    }

    #[test]
    fn test_fill_pass_started_while_open_does_not_settle() {
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));
        tracker.on_place_result("c1", Ok(&ack(0)));

        let snapshot = tracker.get("c1").unwrap().clone();
        tracker.on_cancel_result("c1", Ok(true), 5).unwrap();
        tracker.on_fills_checked(&snapshot);
        assert_eq!(tracker.live_orders().count(), 1);

        let closed = tracker.get("c1").unwrap().clone();
        tracker.on_fills_checked(&closed);
        assert_eq!(tracker.live_orders().count(), 0);
    }

    #[test]
    fn test_canceled_before_ack_is_evicted_at_once() {
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));
        let cancel = OrderUpdate {
            client_order_id: Some("c1".into()),
            exchange_order_id: None,
            ..update(OrderState::Canceled, 5)
        };
        tracker.process_order_update(cancel, UpdateSource::Push);
        assert_eq!(tracker.live_orders().count(), 0);
    }

    #[test]
    fn test_poll_cadence_depends_on_push_confirmation() {
        let settings = ConnectorSettings::default();
        let (mut tracker, _rx) = tracker();
        tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));
        tracker.on_place_result("c1", Ok(&ack(0)));

        assert_eq!(tracker.orders_to_poll(0, true).len(), 1);
        let short = settings.short_poll_interval_ms as i64;
        assert_eq!(tracker.orders_to_poll(short, true).len(), 1);

        tracker.process_order_update(update(OrderState::Open, 1), UpdateSource::Push);
        assert!(tracker.orders_to_poll(2 * short, true).is_empty());
        // push channel unhealthy: back to the short interval
        assert_eq!(tracker.orders_to_poll(2 * short, false).len(), 1);
    }

    fn history() -> impl Strategy<Value = Vec<(OrderState, i64)>> {
        prop::collection::vec((0u8..6, 1i64..1_000), 1..12).prop_map(|steps| {
            let mut ts = 0;
            let mut out: Vec<(OrderState, i64)> = Vec::new();
            for (choice, dt) in steps {
                if out.last().is_some_and(|(s, _)| s.is_terminal()) {
                    break;
                }
                ts += dt;
                let state = match choice {
                    0 | 1 => OrderState::Open,
                    2 | 3 => OrderState::PartiallyFilled,
                    4 => OrderState::Filled,
                    _ => OrderState::Canceled,
                };
                out.push((state, ts));
            }
            out
        })
    }

    fn deliveries() -> impl Strategy<Value = (Vec<(OrderState, i64)>, Vec<(OrderState, i64)>)> {
        history().prop_flat_map(|history| {
            let mut delivered = history.clone();
            delivered.extend(history.iter().copied());
            (Just(history), Just(delivered).prop_shuffle())
        })
    }

    proptest! {
        #[test]
        fn prop_reordered_and_duplicated_updates_never_regress((history, delivered) in deliveries()) {
            let (mut tracker, _rx) = tracker();
            tracker.start_tracking(InFlightOrder::new("c1".into(), intent(dec!(1)), 0));
            tracker.on_place_result("c1", Ok(&ack(0)));

            for (i, (state, ts)) in delivered.into_iter().enumerate() {
                let source = if i % 2 == 0 { UpdateSource::Push } else { UpdateSource::Poll };
                tracker.process_order_update(update(state, ts), source);
            }

            let expected = history.last().map(|(s, _)| *s).unwrap();
            prop_assert_eq!(tracker.get("c1").unwrap().state, expected);
        }
    }
}
