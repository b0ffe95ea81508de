use crate::core::errors::ExchangeError;
use crate::core::kernel::{Clock, WsCodec};
use crate::core::symbols::SymbolRegistry;
use crate::core::types::{parse_levels, MarketEvent, OrderBookDiff, OrderBookSnapshot, TradingPair};
use crate::exchanges::p2b::conversions::trade_tick;
use crate::exchanges::p2b::types::{P2bDepth, P2bWsDeal};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

const DEPTH_UPDATE: &str = "depth.update";
const DEALS_UPDATE: &str = "deals.update";
const DEPTH_STREAM: &str = "depth";
const DEALS_STREAM: &str = "deals";
const DEPTH_LIMIT: u32 = 20;
const DEPTH_INTERVAL: &str = "0.0001";

/// Per-symbol book sequence.
///
/// P2B depth pushes carry no update id. REST snapshots and stream updates
/// for a symbol draw from one counter, so ids stay contiguous in the order
/// they are decoded.
#[derive(Debug, Default)]
pub struct DepthSequence {
    ids: Mutex<HashMap<String, u64>>,
}

impl DepthSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, symbol: &str) -> u64 {
        let mut ids = self.ids.lock();
        let id = ids.entry(symbol.to_string()).or_insert(0);
        *id += 1;
        *id
    }
}

/// Public depth and deals channels, subscribed one stream per frame.
pub struct P2bMarketCodec {
    symbols: SymbolRegistry,
    clock: Arc<dyn Clock>,
    sequence: Arc<DepthSequence>,
    request_id: AtomicU64,
}

impl P2bMarketCodec {
    pub fn new(symbols: SymbolRegistry, clock: Arc<dyn Clock>, sequence: Arc<DepthSequence>) -> Self {
        Self {
            symbols,
            clock,
            sequence,
            request_id: AtomicU64::new(0),
        }
    }

    fn params(frame: &Value) -> Result<&[Value], ExchangeError> {
        frame
            .get("params")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| ExchangeError::malformed("p2b push", "missing params"))
    }

    fn pair(&self, symbol: &Value) -> Result<(String, TradingPair), ExchangeError> {
        let symbol = symbol
            .as_str()
            .ok_or_else(|| ExchangeError::malformed("p2b push", "symbol is not a string"))?;
        Ok((symbol.to_string(), self.symbols.trading_pair(symbol)?))
    }

    /// `params: [clean, {asks, bids}, symbol]`; a clean push replaces the book.
    fn decode_depth(&self, frame: Value) -> Result<Vec<MarketEvent>, ExchangeError> {
        let [clean, depth, symbol, ..] = Self::params(&frame)? else {
            return Err(ExchangeError::malformed(DEPTH_UPDATE, "expected three params"));
        };
        let (symbol, pair) = self.pair(symbol)?;
        let depth = P2bDepth::deserialize(depth).map_err(|e| ExchangeError::malformed(DEPTH_UPDATE, e))?;
        let bids = parse_levels(&depth.bids, "bids")?;
        let asks = parse_levels(&depth.asks, "asks")?;
        let id = self.sequence.next(&symbol);
        let now = self.clock.now_ms();

        let event = if clean.as_bool().unwrap_or(false) {
            MarketEvent::Snapshot(OrderBookSnapshot::new(pair, id, bids, asks, now))
        } else {
            MarketEvent::Diff(OrderBookDiff {
                trading_pair: pair,
                first_update_id: id,
                final_update_id: id,
                bids,
                asks,
                timestamp: now,
            })
        };
        Ok(vec![event])
    }

    /// `params: [symbol, [deal, ...]]`
    fn decode_deals(&self, frame: Value) -> Result<Vec<MarketEvent>, ExchangeError> {
        let [symbol, deals, ..] = Self::params(&frame)? else {
            return Err(ExchangeError::malformed(DEALS_UPDATE, "expected two params"));
        };
        let (_, pair) = self.pair(symbol)?;
        let deals = Vec::<P2bWsDeal>::deserialize(deals)
            .map_err(|e| ExchangeError::malformed(DEALS_UPDATE, e))?;
        deals
            .into_iter()
            .map(|deal| trade_tick(deal, &pair).map(MarketEvent::Trade))
            .collect()
    }
}

impl WsCodec for P2bMarketCodec {
    type Message = MarketEvent;

    fn batch_subscribe(&self) -> bool {
        false
    }

    fn streams_for(&self, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .flat_map(|symbol| [format!("{DEPTH_STREAM}:{symbol}"), format!("{DEALS_STREAM}:{symbol}")])
            .collect()
    }

    fn encode_subscription(&self, streams: &[String]) -> Result<Message, ExchangeError> {
        let [stream] = streams else {
            return Err(ExchangeError::InvalidParameters(format!(
                "p2b subscribes one stream per frame, got {}",
                streams.len()
            )));
        };
        let (params, method) = match stream.split_once(':') {
            Some((DEPTH_STREAM, symbol)) => (json!([symbol, DEPTH_LIMIT, DEPTH_INTERVAL]), "depth.subscribe"),
            Some((DEALS_STREAM, symbol)) => (json!([symbol]), "deals.subscribe"),
            _ => {
                return Err(ExchangeError::InvalidParameters(format!(
                    "unknown p2b stream {stream}"
                )))
            }
        };
        let id = self.request_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Message::Text(
            json!({ "method": method, "params": params, "id": id }).to_string(),
        ))
    }

    fn channel_key(&self, frame: &Value) -> Option<&'static str> {
        match frame.get("method").and_then(Value::as_str)? {
            DEPTH_UPDATE => Some(DEPTH_UPDATE),
            DEALS_UPDATE => Some(DEALS_UPDATE),
            _ => None,
        }
    }

    fn decode_channel(
        &self,
        channel: &'static str,
        frame: Value,
    ) -> Result<Vec<MarketEvent>, ExchangeError> {
        match channel {
            DEPTH_UPDATE => self.decode_depth(frame),
            DEALS_UPDATE => self.decode_deals(frame),
            _ => Ok(Vec::new()),
        }
    }
}
