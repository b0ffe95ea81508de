use crate::core::types::string_or_number;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Envelope wrapped around every REST response. `errorCode` is `""` on
/// success and a number (sometimes quoted) on failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2bResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub error_code: Value,
    #[serde(default)]
    pub message: Value,
    pub result: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct P2bId(#[serde(deserialize_with = "string_or_number")] pub String);

#[derive(Debug, Clone, Deserialize)]
pub struct P2bMarket {
    /// `ETH_BTC`
    pub name: String,
    pub stock: String,
    pub money: String,
    pub limits: P2bLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2bLimits {
    pub min_amount: Decimal,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_total: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct P2bDepth {
    #[serde(default)]
    pub asks: Vec<Vec<Value>>,
    #[serde(default)]
    pub bids: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2bTickerEntry {
    pub ticker: P2bTicker,
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2bTicker {
    pub last: Option<Decimal>,
}

pub type P2bTickers = HashMap<String, P2bTickerEntry>;

/// `timestamp` is fractional seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2bPlaceResult {
    pub order_id: P2bId,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2bOpenOrder {
    pub order_id: P2bId,
    pub market: String,
    pub price: Decimal,
    pub side: String,
    pub timestamp: f64,
    pub deal_money: Decimal,
    pub deal_stock: Decimal,
    pub amount: Decimal,
    pub left: Decimal,
    #[serde(default)]
    pub deal_fee: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct P2bDealPage {
    #[serde(default)]
    pub records: Vec<P2bDeal>,
}

/// One execution of an order; `deal` is the quote amount.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2bDeal {
    pub id: P2bId,
    pub time: f64,
    #[serde(default)]
    pub fee: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    pub deal_order_id: P2bId,
    #[serde(default)]
    pub role: i64,
    pub deal: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2bBalance {
    pub available: Decimal,
    pub freeze: Decimal,
}

pub type P2bBalances = HashMap<String, P2bBalance>;

/// Public trade inside a `deals.update` push.
#[derive(Debug, Clone, Deserialize)]
pub struct P2bWsDeal {
    pub id: P2bId,
    pub time: f64,
    pub price: Decimal,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub side: String,
}
