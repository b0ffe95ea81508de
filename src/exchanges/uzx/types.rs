use crate::core::types::string_or_number;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// REST envelope. Some endpoints answer with `success`, others only with
/// `code`; a `code` of 200 counts as success when `success` is absent.
#[derive(Debug, Clone, Deserialize)]
pub struct UzxResponse<T> {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> UzxResponse<T> {
    pub fn is_success(&self) -> bool {
        match self.success {
            Some(success) => success,
            None => self.code == Some(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct UzxId(#[serde(deserialize_with = "string_or_number")] pub String);

#[derive(Debug, Clone, Deserialize)]
pub struct UzxProduct {
    /// `BTCUSDT`
    pub product_name: String,
    pub base_coin_name: String,
    pub quote_coin_name: String,
    pub coin_precision: u32,
    pub price_precision: u32,
    /// 1 when listed for trading
    #[serde(default)]
    pub status: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UzxBookSide {
    #[serde(default)]
    pub items: Vec<Value>,
}

/// REST depth: `{"bid": {"items": [...]}, "ask": {"items": [...]}}`
#[derive(Debug, Clone, Deserialize)]
pub struct UzxDepth {
    pub bid: UzxBookSide,
    pub ask: UzxBookSide,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UzxTicker {
    pub product_name: String,
    #[serde(default)]
    pub close: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UzxPlaceResult {
    pub order_id: UzxId,
    /// Milliseconds
    #[serde(default)]
    pub ser_time: Option<i64>,
}

/// Entry of the open (`/v2/trade/orders`) or finished
/// (`/v2/trade/history/orders`) order lists.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UzxOrder {
    pub order_id: UzxId,
    pub status: i64,
    #[serde(default)]
    pub traded_amount: Decimal,
    #[serde(default)]
    pub turnover: Decimal,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub completed_time: Option<i64>,
    #[serde(default)]
    pub canceled_time: Option<i64>,
}

impl UzxOrder {
    /// When the order left the book, for finished orders.
    pub fn finished_at(&self) -> Option<i64> {
        self.completed_time.or(self.canceled_time)
    }

    /// Most recent timestamp the exchange reported for this order.
    pub fn last_change(&self) -> Option<i64> {
        self.finished_at().or(self.time)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UzxCoin {
    pub unit: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UzxBalance {
    pub coin: UzxCoin,
    /// Available
    pub balance: Decimal,
    pub total_balance: Decimal,
}

/// `spot.orderBook` push; every push is a complete book.
#[derive(Debug, Clone, Deserialize)]
pub struct UzxBookPush {
    pub product_name: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub bids: Vec<Value>,
    #[serde(default)]
    pub asks: Vec<Value>,
    pub ts: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UzxFill {
    pub id: UzxId,
    pub price: Decimal,
    pub vol: Decimal,
    pub ts: i64,
    pub direction: String,
}

/// `spot.fills` push
#[derive(Debug, Clone, Deserialize)]
pub struct UzxFillsPush {
    pub product_name: String,
    #[serde(default)]
    pub data: Vec<UzxFill>,
}

/// `spot.order` push on the private socket
#[derive(Debug, Clone, Deserialize)]
pub struct UzxOrderPush {
    pub product_name: String,
    pub ts: i64,
    pub data: Value,
}

/// `spot.balance` push on the private socket
#[derive(Debug, Clone, Deserialize)]
pub struct UzxBalancePush {
    #[serde(default)]
    pub data: Vec<UzxBalance>,
}
