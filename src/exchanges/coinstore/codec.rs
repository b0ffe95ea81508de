use crate::core::errors::ExchangeError;
use crate::core::kernel::{Clock, WsCodec};
use crate::core::status::StatusTable;
use crate::core::symbols::SymbolRegistry;
use crate::core::types::{parse_levels, MarketEvent, OrderBookSnapshot, UserEvent};
use crate::exchanges::coinstore::conversions::{
    account_position, execution_report, normalize_symbol, trade_tick,
};
use crate::exchanges::coinstore::types::{
    CoinstoreAccountPosition, CoinstoreDepth, CoinstoreExecutionReport, CoinstoreTrade,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

const DEPTH_CHANNEL: &str = "depth";
const TRADE_CHANNEL: &str = "trade";
const EXECUTION_REPORT: &str = "executionReport";
const ACCOUNT_POSITION: &str = "outboundAccountPosition";

/// Public depth and trade channels.
///
/// Every depth push is a full book, so each one becomes a snapshot. Pushes
/// carry no sequence number; ids are wall-clock milliseconds forced to be
/// strictly increasing.
pub struct CoinstoreMarketCodec {
    symbols: SymbolRegistry,
    clock: Arc<dyn Clock>,
    last_update_id: AtomicU64,
}

impl CoinstoreMarketCodec {
    pub fn new(symbols: SymbolRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            symbols,
            clock,
            last_update_id: AtomicU64::new(0),
        }
    }

    fn next_update_id(&self) -> u64 {
        let now = self.clock.now_ms().max(0) as u64;
        let previous = self
            .last_update_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_default();
        now.max(previous + 1)
    }

    fn decode_depth(&self, frame: Value) -> Result<Vec<MarketEvent>, ExchangeError> {
        let symbol = frame
            .get("symbol")
            .and_then(Value::as_str)
            .ok_or_else(|| ExchangeError::malformed("depth", "missing symbol"))?;
        let pair = self.symbols.trading_pair(&normalize_symbol(symbol))?;
        let depth = CoinstoreDepth::deserialize(&frame)
            .map_err(|e| ExchangeError::malformed("depth", e))?;

        Ok(vec![MarketEvent::Snapshot(OrderBookSnapshot::new(
            pair,
            self.next_update_id(),
            parse_levels(&depth.b, "bids")?,
            parse_levels(&depth.a, "asks")?,
            self.clock.now_ms(),
        ))])
    }

    fn decode_trades(&self, frame: Value) -> Result<Vec<MarketEvent>, ExchangeError> {
        let raw: Vec<CoinstoreTrade> = match frame.get("data") {
            Some(data) => Vec::deserialize(data),
            None => CoinstoreTrade::deserialize(&frame).map(|trade| vec![trade]),
        }
        .map_err(|e| ExchangeError::malformed("trade", e))?;

        raw.into_iter()
            .map(|trade| trade_tick(trade, &self.symbols).map(MarketEvent::Trade))
            .collect()
    }
}

impl WsCodec for CoinstoreMarketCodec {
    type Message = MarketEvent;

    fn streams_for(&self, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .flat_map(|symbol| {
                let lower = symbol.to_lowercase();
                [format!("{lower}@{DEPTH_CHANNEL}"), format!("{lower}@{TRADE_CHANNEL}")]
            })
            .collect()
    }

    fn encode_subscription(&self, streams: &[String]) -> Result<Message, ExchangeError> {
        Ok(Message::Text(
            json!({ "op": "SUB", "channel": streams, "id": 1 }).to_string(),
        ))
    }

    fn heartbeat_reply(&self, frame: &Value) -> Option<Message> {
        (frame.get("op").and_then(Value::as_str) == Some("ping")).then(|| {
            Message::Text(json!({ "op": "pong", "epochMillis": self.clock.now_ms() }).to_string())
        })
    }

    fn channel_key(&self, frame: &Value) -> Option<&'static str> {
        // subscription acks carry a `result` field
        if frame.get("result").is_some() {
            return None;
        }
        match frame.get("T").and_then(Value::as_str)? {
            DEPTH_CHANNEL => Some(DEPTH_CHANNEL),
            TRADE_CHANNEL => Some(TRADE_CHANNEL),
            _ => None,
        }
    }

    fn decode_channel(
        &self,
        channel: &'static str,
        frame: Value,
    ) -> Result<Vec<MarketEvent>, ExchangeError> {
        match channel {
            DEPTH_CHANNEL => self.decode_depth(frame),
            TRADE_CHANNEL => self.decode_trades(frame),
            _ => Ok(Vec::new()),
        }
    }
}

/// Private order and balance reports on a listen-key socket. The key in the
/// URL selects the account, so nothing is subscribed.
pub struct CoinstoreUserCodec {
    symbols: SymbolRegistry,
    status: Arc<StatusTable>,
}

impl CoinstoreUserCodec {
    pub fn new(symbols: SymbolRegistry, status: Arc<StatusTable>) -> Self {
        Self { symbols, status }
    }
}

impl WsCodec for CoinstoreUserCodec {
    type Message = UserEvent;

    fn streams_for(&self, _symbols: &[String]) -> Vec<String> {
        Vec::new()
    }

    fn encode_subscription(&self, streams: &[String]) -> Result<Message, ExchangeError> {
        Ok(Message::Text(
            json!({ "op": "SUB", "channel": streams, "id": 1 }).to_string(),
        ))
    }

    fn channel_key(&self, frame: &Value) -> Option<&'static str> {
        match frame.get("e").and_then(Value::as_str)? {
            EXECUTION_REPORT => Some(EXECUTION_REPORT),
            ACCOUNT_POSITION => Some(ACCOUNT_POSITION),
            _ => None,
        }
    }

    fn decode_channel(
        &self,
        channel: &'static str,
        frame: Value,
    ) -> Result<Vec<UserEvent>, ExchangeError> {
        match channel {
            EXECUTION_REPORT => {
                let report: CoinstoreExecutionReport = serde_json::from_value(frame)
                    .map_err(|e| ExchangeError::malformed(EXECUTION_REPORT, e))?;
                execution_report(report, &self.symbols, &self.status)
            }
            ACCOUNT_POSITION => {
                let position: CoinstoreAccountPosition = serde_json::from_value(frame)
                    .map_err(|e| ExchangeError::malformed(ACCOUNT_POSITION, e))?;
                Ok(account_position(position))
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::ManualClock;
    use crate::core::symbols::SymbolMap;
    use crate::core::types::{OrderSide, TradingPair};
    use crate::exchanges::coinstore::conversions::status_table;
    use rust_decimal_macros::dec;

    fn registry() -> SymbolRegistry {
        let registry = SymbolRegistry::new();
        registry.replace(SymbolMap::from_entries([(
            "BTCUSDT".to_string(),
            TradingPair::new("BTC", "USDT").unwrap(),
        )]));
        registry
    }

    fn market_codec(clock: Arc<ManualClock>) -> CoinstoreMarketCodec {
        CoinstoreMarketCodec::new(registry(), clock)
    }

    #[test]
    fn test_depth_and_trade_streams_share_one_frame() {
        let codec = market_codec(Arc::new(ManualClock::new(0)));
        let streams = codec.streams_for(&["BTCUSDT".to_string()]);
        assert_eq!(streams, vec!["btcusdt@depth", "btcusdt@trade"]);
        assert!(codec.batch_subscribe());

        let Message::Text(text) = codec.encode_subscription(&streams).unwrap() else {
            panic!("expected a text frame");
        };
        let frame: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["op"], "SUB");
        assert_eq!(frame["channel"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_depth_push_is_sorted_snapshot_with_increasing_ids() {
        let clock = Arc::new(ManualClock::new(1_000));
        let codec = market_codec(clock.clone());
        let frame = json!({
            "T": "depth", "symbol": "BTCUSDT", "level": 20, "instrumentId": 1,
            "b": [["99", "1"], ["100", "2"]],
            "a": [["102", "1"], ["101", "3"]]
        });

        let first = codec.decode_frame(frame.clone()).unwrap();
        let second = codec.decode_frame(frame).unwrap();
        let (MarketEvent::Snapshot(a), MarketEvent::Snapshot(b)) = (&first[0], &second[0]) else {
            panic!("depth pushes decode to snapshots");
        };
        assert_eq!(a.bids[0].price, dec!(100));
        assert_eq!(a.asks[0].price, dec!(101));
        assert_eq!(a.update_id, 1_000);
        // same millisecond still advances the id
        assert_eq!(b.update_id, 1_001);
    }

    #[test]
    fn test_trade_frames_single_and_batched() {
        let codec = market_codec(Arc::new(ManualClock::new(0)));
        let single = codec
            .decode_frame(json!({
                "T": "trade", "symbol": "BTCUSDT", "tradeId": 11, "price": "100",
                "volume": "0.5", "takerSide": "BUY", "ts": 1700000000000i64
            }))
            .unwrap();
        assert_eq!(single.len(), 1);

        let batched = codec
            .decode_frame(json!({
                "T": "trade",
                "data": [
                    {"symbol": "BTCUSDT", "tradeId": 12, "price": "100", "volume": "1", "takerSide": "SELL", "time": 1700000000},
                    {"symbol": "BTCUSDT", "tradeId": 13, "price": "101", "volume": "2", "takerSide": "BUY", "time": 1700000001}
                ]
            }))
            .unwrap();
        assert_eq!(batched.len(), 2);
        match &batched[0] {
            MarketEvent::Trade(tick) => {
                assert_eq!(tick.side, OrderSide::Sell);
                assert_eq!(tick.timestamp, 1_700_000_000_000);
            }
            other => panic!("expected a trade, got {other:?}"),
        }
    }

    #[test]
    fn test_acks_and_unknown_frames_are_ignored() {
        let codec = market_codec(Arc::new(ManualClock::new(0)));
        assert!(codec.decode_frame(json!({"result": null, "id": 1})).unwrap().is_empty());
        assert!(codec.decode_frame(json!({"T": "kline"})).unwrap().is_empty());
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let codec = market_codec(Arc::new(ManualClock::new(42)));
        let Some(Message::Text(reply)) = codec.heartbeat_reply(&json!({"op": "ping", "epochMillis": 1}))
        else {
            panic!("ping needs a text reply");
        };
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply, json!({"op": "pong", "epochMillis": 42}));
        assert!(codec.heartbeat_reply(&json!({"T": "depth"})).is_none());
    }

    #[test]
    fn test_user_codec_routes_reports_and_positions() {
        let codec = CoinstoreUserCodec::new(registry(), Arc::new(status_table().unwrap()));
        assert!(codec.streams_for(&["BTCUSDT".to_string()]).is_empty());

        let events = codec
            .decode_frame(json!({
                "e": "outboundAccountPosition",
                "B": [{"a": "usdt", "f": "10", "l": "5"}]
            }))
            .unwrap();
        assert!(matches!(
            &events[0],
            UserEvent::Balance(b) if b.asset == "USDT" && b.total == dec!(15)
        ));

        let events = codec
            .decode_frame(json!({
                "e": "executionReport", "s": "BTCUSDT", "c": "c1", "x": "NEW", "X": "NEW",
                "i": 42, "E": 5
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
    }
}
