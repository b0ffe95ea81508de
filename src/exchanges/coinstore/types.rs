use crate::core::types::string_or_number;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// Envelope wrapped around every REST response.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinstoreResponse<T> {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    pub data: Option<T>,
}

/// Order and trade ids come back as numbers or strings depending on the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct CoinstoreId(#[serde(deserialize_with = "string_or_number")] pub String);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinstoreSymbol {
    pub symbol_code: String,
    pub trade_currency_code: String,
    pub quote_currency_code: String,
    #[serde(default)]
    pub open_trade: bool,
    /// Price decimal places
    pub tick_sz: u32,
    /// Quantity decimal places
    pub lot_sz: u32,
    pub min_lmt_sz: Decimal,
    pub min_mkt_va: Decimal,
}

/// Depth levels are `[price, quantity]` arrays, strings or numbers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoinstoreDepth {
    #[serde(default)]
    pub a: Vec<Vec<Value>>,
    #[serde(default)]
    pub b: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinstoreTicker {
    pub symbol: String,
    pub close: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinstorePlaceResult {
    pub ord_id: CoinstoreId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinstoreCancelResult {
    pub state: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoinstoreBatchCancelResult {
    #[serde(default)]
    pub success: Vec<CoinstoreId>,
    #[serde(default)]
    pub reject: Vec<CoinstoreId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinstoreOrderInfo {
    pub ord_id: CoinstoreId,
    pub ord_status: String,
    /// Milliseconds
    pub order_update_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinstoreMatch {
    pub order_id: CoinstoreId,
    pub trade_id: CoinstoreId,
    pub exec_qty: Decimal,
    pub exec_amt: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    /// Milliseconds
    pub match_time: i64,
}

/// One row of `/spot/accountList`; each currency appears once per balance type.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinstoreAccountEntry {
    pub currency: String,
    pub balance: Decimal,
    #[serde(rename = "type")]
    pub kind: i64,
}

/// Private stream order/trade report.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinstoreExecutionReport {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c", default)]
    pub client_order_id: Option<String>,
    /// Original client id, carried on cancel reports
    #[serde(rename = "C", default)]
    pub orig_client_order_id: Option<String>,
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "i")]
    pub order_id: CoinstoreId,
    #[serde(rename = "t", default)]
    pub trade_id: Option<CoinstoreId>,
    #[serde(rename = "l", default)]
    pub last_quantity: Option<Decimal>,
    #[serde(rename = "L", default)]
    pub last_price: Option<Decimal>,
    #[serde(rename = "n", default)]
    pub commission: Option<Decimal>,
    #[serde(rename = "N", default)]
    pub commission_asset: Option<String>,
    #[serde(rename = "T", default)]
    pub trade_time: Option<i64>,
    #[serde(rename = "E")]
    pub event_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinstoreAccountPosition {
    #[serde(rename = "B", default)]
    pub balances: Vec<CoinstorePositionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinstorePositionEntry {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f")]
    pub free: Decimal,
    #[serde(rename = "l")]
    pub locked: Decimal,
}

/// Public trade push; `ts` is milliseconds, `time` seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinstoreTrade {
    pub symbol: String,
    pub trade_id: CoinstoreId,
    pub price: Decimal,
    pub volume: Decimal,
    pub taker_side: String,
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub time: Option<i64>,
}
