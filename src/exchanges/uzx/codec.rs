use crate::core::errors::ExchangeError;
use crate::core::kernel::{Clock, WsCodec};
use crate::core::status::StatusTable;
use crate::core::symbols::SymbolRegistry;
use crate::core::types::{MarketEvent, OrderBookSnapshot, OrderUpdate, UserEvent};
use crate::exchanges::uzx::conversions::{balance, levels, order_state, trade_tick};
use crate::exchanges::uzx::types::{
    UzxBalancePush, UzxBookPush, UzxFillsPush, UzxOrder, UzxOrderPush,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

const BIZ: &str = "spot";
const ORDER_BOOK: &str = "spot.orderBook";
const FILLS: &str = "spot.fills";
const ORDERS: &str = "spot.order";
const BALANCES: &str = "spot.balance";

/// `{"event": "sub", ...}` for one channel, optionally scoped to a symbol.
fn subscribe_frame(stream: &str) -> Message {
    let (channel, symbol) = match stream.split_once(':') {
        Some((channel, symbol)) => (channel, Some(symbol)),
        None => (stream, None),
    };
    let mut params = json!({ "biz": BIZ, "type": channel });
    if let Some(symbol) = symbol {
        params["symbol"] = Value::from(symbol);
    }
    if channel == ORDER_BOOK {
        params["interval"] = Value::from("0");
    }
    Message::Text(json!({ "event": "sub", "params": params, "zip": false }).to_string())
}

fn one_stream(streams: &[String]) -> Result<&str, ExchangeError> {
    match streams {
        [stream] => Ok(stream.as_str()),
        _ => Err(ExchangeError::InvalidParameters(format!(
            "uzx subscribes one stream per frame, got {}",
            streams.len()
        ))),
    }
}

/// Server pings are `{"ping": <ms>}` and want `{"pong": <ms>}` back.
fn pong(frame: &Value, clock: &dyn Clock) -> Option<Message> {
    frame
        .get("ping")
        .map(|_| Message::Text(json!({ "pong": clock.now_ms() }).to_string()))
}

/// Channel from the push `type`, compared case-insensitively. Frames with a
/// `status` field are subscription or login replies.
fn push_channel(frame: &Value, channels: &[&'static str]) -> Option<&'static str> {
    if frame.get("status").is_some() {
        return None;
    }
    let kind = frame.get("type").and_then(Value::as_str)?;
    channels
        .iter()
        .find(|channel| channel.eq_ignore_ascii_case(kind))
        .copied()
}

/// Public order book and fills channels.
pub struct UzxMarketCodec {
    symbols: SymbolRegistry,
    clock: Arc<dyn Clock>,
}

impl UzxMarketCodec {
    pub fn new(symbols: SymbolRegistry, clock: Arc<dyn Clock>) -> Self {
        Self { symbols, clock }
    }

    fn decode_book(&self, frame: Value) -> Result<Vec<MarketEvent>, ExchangeError> {
        let push = UzxBookPush::deserialize(&frame).map_err(|e| ExchangeError::malformed(ORDER_BOOK, e))?;
        let pair = self.symbols.trading_pair(&push.product_name)?;
        let update_id = push.version.or(push.id).unwrap_or(push.ts.max(0) as u64);
        Ok(vec![MarketEvent::Snapshot(OrderBookSnapshot::new(
            pair,
            update_id,
            levels(&push.bids, "bids")?,
            levels(&push.asks, "asks")?,
            push.ts,
        ))])
    }

    fn decode_fills(&self, frame: Value) -> Result<Vec<MarketEvent>, ExchangeError> {
        let push = UzxFillsPush::deserialize(&frame).map_err(|e| ExchangeError::malformed(FILLS, e))?;
        let pair = self.symbols.trading_pair(&push.product_name)?;
        push.data
            .into_iter()
            .map(|fill| trade_tick(fill, &pair).map(MarketEvent::Trade))
            .collect()
    }
}

impl WsCodec for UzxMarketCodec {
    type Message = MarketEvent;

    fn batch_subscribe(&self) -> bool {
        false
    }

    fn streams_for(&self, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .flat_map(|symbol| [format!("{ORDER_BOOK}:{symbol}"), format!("{FILLS}:{symbol}")])
            .collect()
    }

    fn encode_subscription(&self, streams: &[String]) -> Result<Message, ExchangeError> {
        one_stream(streams).map(subscribe_frame)
    }

    fn heartbeat_reply(&self, frame: &Value) -> Option<Message> {
        pong(frame, self.clock.as_ref())
    }

    fn channel_key(&self, frame: &Value) -> Option<&'static str> {
        push_channel(frame, &[ORDER_BOOK, FILLS])
    }

    fn decode_channel(
        &self,
        channel: &'static str,
        frame: Value,
    ) -> Result<Vec<MarketEvent>, ExchangeError> {
        match channel {
            ORDER_BOOK => self.decode_book(frame),
            FILLS => self.decode_fills(frame),
            _ => Ok(Vec::new()),
        }
    }
}

/// Private order and balance channels on the login socket.
pub struct UzxUserCodec {
    symbols: SymbolRegistry,
    status: Arc<StatusTable>,
    clock: Arc<dyn Clock>,
}

impl UzxUserCodec {
    pub fn new(symbols: SymbolRegistry, status: Arc<StatusTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            symbols,
            status,
            clock,
        }
    }

    /// `data` is a single order or a list of them.
    fn decode_orders(&self, frame: Value) -> Result<Vec<UserEvent>, ExchangeError> {
        let push = UzxOrderPush::deserialize(&frame).map_err(|e| ExchangeError::malformed(ORDERS, e))?;
        let pair = self.symbols.trading_pair(&push.product_name)?;
        let orders = match push.data {
            Value::Array(items) => items,
            single => vec![single],
        };
        orders
            .into_iter()
            .map(|raw| {
                let order: UzxOrder =
                    serde_json::from_value(raw).map_err(|e| ExchangeError::malformed(ORDERS, e))?;
                Ok(UserEvent::Order(OrderUpdate {
                    client_order_id: None,
                    exchange_order_id: Some(order.order_id.0.clone()),
                    trading_pair: pair.clone(),
                    new_state: order_state(&self.status, order.status)?,
                    update_timestamp: push.ts,
                }))
            })
            .collect()
    }

    fn decode_balances(frame: Value) -> Result<Vec<UserEvent>, ExchangeError> {
        let push = UzxBalancePush::deserialize(&frame).map_err(|e| ExchangeError::malformed(BALANCES, e))?;
        Ok(push
            .data
            .into_iter()
            .map(|raw| UserEvent::Balance(balance(raw)))
            .collect())
    }
}

impl WsCodec for UzxUserCodec {
    type Message = UserEvent;

    fn batch_subscribe(&self) -> bool {
        false
    }

    fn streams_for(&self, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .map(|symbol| format!("{ORDERS}:{symbol}"))
            .chain(std::iter::once(BALANCES.to_string()))
            .collect()
    }

    fn encode_subscription(&self, streams: &[String]) -> Result<Message, ExchangeError> {
        one_stream(streams).map(subscribe_frame)
    }

    fn heartbeat_reply(&self, frame: &Value) -> Option<Message> {
        pong(frame, self.clock.as_ref())
    }

    /// `{"event": "login", "status": "ok"}`; any other status is a rejection.
    fn login_reply(&self, frame: &Value) -> Option<Result<(), ExchangeError>> {
        if frame.get("event").and_then(Value::as_str) != Some("login") {
            return None;
        }
        let status = frame.get("status").and_then(Value::as_str).unwrap_or_default();
        if status.eq_ignore_ascii_case("ok") {
            return Some(Ok(()));
        }
        let reason = frame
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or(status);
        Some(Err(ExchangeError::AuthError(format!("uzx login rejected: {reason}"))))
    }

    fn channel_key(&self, frame: &Value) -> Option<&'static str> {
        push_channel(frame, &[ORDERS, BALANCES])
    }

    fn decode_channel(
        &self,
        channel: &'static str,
        frame: Value,
    ) -> Result<Vec<UserEvent>, ExchangeError> {
        match channel {
            ORDERS => self.decode_orders(frame),
            BALANCES => Self::decode_balances(frame),
            _ => Ok(Vec::new()),
        }
    }
}
