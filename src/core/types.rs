use crate::core::errors::ExchangeError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid trading pair: {0}")]
    InvalidTradingPair(String),
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(#[from] rust_decimal::Error),
}

/// Canonical `BASE-QUOTE` trading pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, TypesError> {
        let base = base.into().to_uppercase();
        let quote = quote.into().to_uppercase();

        if base.is_empty() || quote.is_empty() {
            return Err(TypesError::InvalidTradingPair(
                "Base and quote assets cannot be empty".to_string(),
            ));
        }

        Ok(Self { base, quote })
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('-')
            .ok_or_else(|| TypesError::InvalidTradingPair(s.to_string()))?;
        Self::new(base, quote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    LimitMaker,
    Market,
}

/// Canonical order lifecycle.
///
/// `PendingCreate → Open ⇄ PartiallyFilled → Filled`, and any live state may
/// end in `Canceled` or `Failed`. Terminal states have no outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    PendingCreate,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Failed)
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::PartiallyFilled)
    }

    /// Whether `next` may be recorded after `self`. Re-reporting the current
    /// live state is allowed so that a newer timestamp can be recorded.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Filled | Self::Canceled | Self::Failed => false,
            Self::PendingCreate => true,
            Self::Open | Self::PartiallyFilled => next != Self::PendingCreate,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PendingCreate => "PENDING_CREATE",
            Self::Open => "OPEN",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// What the strategy asks for; the tracker turns it into an `InFlightOrder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIntent {
    pub trading_pair: TradingPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderAck {
    pub client_order_id: String,
    pub exchange_order_id: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub client_order_id: Option<String>,
    pub exchange_order_id: Option<String>,
    pub trading_pair: TradingPair,
    pub new_state: OrderState,
    /// Milliseconds since epoch
    pub update_timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFee {
    pub amount: Decimal,
    pub asset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub trade_id: String,
    pub client_order_id: Option<String>,
    pub exchange_order_id: Option<String>,
    pub trading_pair: TradingPair,
    pub fill_price: Decimal,
    pub fill_base_amount: Decimal,
    pub fill_quote_amount: Decimal,
    pub fee: TradeFee,
    pub fill_timestamp: i64,
}

/// Cumulative execution totals reported by exchanges without a fills endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CumulativeFill {
    pub filled_base: Decimal,
    pub filled_quote: Decimal,
    pub fee: TradeFee,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillReport {
    Trades(Vec<TradeUpdate>),
    Cumulative(CumulativeFill),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

impl OrderBookLevel {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }
}

/// Bids are sorted by price descending, asks ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub trading_pair: TradingPair,
    pub update_id: u64,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: i64,
}

impl OrderBookSnapshot {
    /// Sorts both sides and drops empty levels.
    pub fn new(
        trading_pair: TradingPair,
        update_id: u64,
        mut bids: Vec<OrderBookLevel>,
        mut asks: Vec<OrderBookLevel>,
        timestamp: i64,
    ) -> Self {
        bids.retain(|level| !level.amount.is_zero());
        asks.retain(|level| !level.amount.is_zero());
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            trading_pair,
            update_id,
            bids,
            asks,
            timestamp,
        }
    }

    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.first()
    }
}

/// A zero amount removes the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookDiff {
    pub trading_pair: TradingPair,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTick {
    pub trading_pair: TradingPair,
    pub trade_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    Snapshot(OrderBookSnapshot),
    Diff(OrderBookDiff),
    Trade(TradeTick),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub total: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingRule {
    pub trading_pair: TradingPair,
    pub min_order_size: Decimal,
    pub min_notional: Decimal,
    pub min_price_increment: Decimal,
    pub min_base_amount_increment: Decimal,
}

/// Symbol map entries and trading rules decoded from one metadata response.
#[derive(Debug, Clone, Default)]
pub struct ExchangeInfo {
    pub symbols: Vec<(String, TradingPair)>,
    pub rules: Vec<TradingRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub client_order_id: String,
    pub success: bool,
}

/// Decoded private-stream payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    Order(OrderUpdate),
    Trade(TradeUpdate),
    Balance(Balance),
}

/// What the strategy sees on `order_events()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    OrderUpdate(OrderUpdate),
    TradeUpdate(TradeUpdate),
    BalanceUpdate(Balance),
}

pub fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| ExchangeError::malformed(field, e))
}

/// Decimal from a JSON string or number, as exchanges send either.
pub fn decimal_from_value(value: &serde_json::Value, field: &str) -> Result<Decimal, ExchangeError> {
    match value {
        serde_json::Value::String(raw) => parse_decimal(raw, field),
        serde_json::Value::Number(number) => parse_decimal(&number.to_string(), field),
        other => Err(ExchangeError::malformed(field, format!("expected a number, got {other}"))),
    }
}

/// `[price, amount, ...]` depth rows, strings or numbers.
pub fn parse_levels(
    raw: &[Vec<serde_json::Value>],
    side: &str,
) -> Result<Vec<OrderBookLevel>, ExchangeError> {
    raw.iter()
        .map(|level| match level.as_slice() {
            [price, amount, ..] => Ok(OrderBookLevel::new(
                decimal_from_value(price, side)?,
                decimal_from_value(amount, side)?,
            )),
            _ => Err(ExchangeError::malformed(side, "level needs price and amount")),
        })
        .collect()
}

pub fn parse_side(raw: &str) -> Result<OrderSide, ExchangeError> {
    match raw.to_ascii_uppercase().as_str() {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(ExchangeError::malformed("side", other)),
    }
}

/// Order ids arrive as JSON strings on some endpoints and numbers on others.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Unsigned(u64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Unsigned(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

/// Exchanges disagree on epoch units; everything internal is milliseconds.
pub fn seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// `10^-places`, the increment implied by a decimal-places count.
pub fn increment_from_places(places: u32) -> Decimal {
    Decimal::new(1, places)
}
