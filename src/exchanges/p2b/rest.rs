use crate::core::cache::{Fetched, TtlCache};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{Clock, Endpoint, RateLimitRule, RestClient};
use crate::core::status::StatusTable;
use crate::core::tracker::InFlightOrder;
use crate::core::traits::ExchangeRest;
use crate::core::types::{
    parse_levels, seconds_to_millis, Balance, ExchangeInfo, FillReport, OrderBookSnapshot,
    OrderSide, OrderUpdate, PlaceOrderAck, TradingPair,
};
use crate::exchanges::p2b::codec::DepthSequence;
use crate::exchanges::p2b::conversions::{self, derive_status};
use crate::exchanges::p2b::types::{
    P2bBalances, P2bDeal, P2bDealPage, P2bDepth, P2bMarket, P2bOpenOrder, P2bPlaceResult,
    P2bResponse, P2bTickers,
};
use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// "Order not found."
pub const ORDER_NOT_FOUND_CODE: i64 = 2030;
/// "Invalid orderId value."
pub const UNKNOWN_ORDER_CODE: i64 = 3080;

const SNAPSHOT_DEPTH: &str = "100";
const PAGE_LIMIT: u32 = 100;
const OPEN_ORDERS_TTL: Duration = Duration::from_secs(10);

pub const RAW_REQUESTS: &str = "RAW_REQUESTS";
const MARKETS_LIMIT: &str = "/public/markets";
const DEPTH_LIMIT: &str = "/public/depth/result";
const TICKERS_LIMIT: &str = "/public/tickers";
const PLACE_LIMIT: &str = "/order/new";
const CANCEL_LIMIT: &str = "/order/cancel";
const OPEN_ORDERS_LIMIT: &str = "/orders";
const ORDER_DEALS_LIMIT: &str = "/account/order";
const BALANCES_LIMIT: &str = "/account/balances";

pub const MARKETS: Endpoint = Endpoint::public(Method::GET, "/api/v2/public/markets", MARKETS_LIMIT);
pub const DEPTH: Endpoint = Endpoint::public(Method::GET, "/api/v2/public/depth/result", DEPTH_LIMIT);
pub const TICKERS: Endpoint = Endpoint::public(Method::GET, "/api/v2/public/tickers", TICKERS_LIMIT);
pub const PLACE_ORDER: Endpoint = Endpoint::signed(Method::POST, "/api/v2/order/new", PLACE_LIMIT);
pub const CANCEL_ORDER: Endpoint = Endpoint::signed(Method::POST, "/api/v2/order/cancel", CANCEL_LIMIT);
pub const OPEN_ORDERS: Endpoint =
    Endpoint::signed_read(Method::POST, "/api/v2/orders", OPEN_ORDERS_LIMIT);
pub const ORDER_DEALS: Endpoint =
    Endpoint::signed_read(Method::POST, "/api/v2/account/order", ORDER_DEALS_LIMIT);
pub const BALANCES: Endpoint =
    Endpoint::signed_read(Method::POST, "/api/v2/account/balances", BALANCES_LIMIT);

/// Ten requests per second overall; every endpoint draws one unit from the
/// shared pool.
pub fn rate_limits() -> Vec<RateLimitRule> {
    let second = Duration::from_secs(1);
    let mut rules = vec![RateLimitRule::new(RAW_REQUESTS, 10, second)];
    rules.extend(
        [
            MARKETS_LIMIT,
            DEPTH_LIMIT,
            TICKERS_LIMIT,
            PLACE_LIMIT,
            CANCEL_LIMIT,
            OPEN_ORDERS_LIMIT,
            ORDER_DEALS_LIMIT,
            BALANCES_LIMIT,
        ]
        .into_iter()
        .map(|id| RateLimitRule::new(id, 10, second).linked(RAW_REQUESTS, 1)),
    );
    rules
}

fn error_code(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn api_error(error_code: Option<i64>, message: &Value) -> ExchangeError {
    let message = match message {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    match error_code {
        Some(ORDER_NOT_FOUND_CODE | UNKNOWN_ORDER_CODE) => ExchangeError::OrderNotFound(message),
        code => ExchangeError::ApiError {
            code: code.unwrap_or_default(),
            message,
        },
    }
}

/// P2B answers most rejections with HTTP 400 and the usual envelope.
fn classify_http_error(error: ExchangeError) -> ExchangeError {
    match error {
        ExchangeError::ApiError { code, message } => {
            match serde_json::from_str::<P2bResponse<Value>>(&message) {
                Ok(body) if !body.success => api_error(error_code(&body.error_code), &body.message),
                _ => ExchangeError::ApiError { code, message },
            }
        }
        other => other,
    }
}

fn result<T: DeserializeOwned>(raw: Value, context: &str) -> Result<T, ExchangeError> {
    let response: P2bResponse<Value> =
        serde_json::from_value(raw).map_err(|e| ExchangeError::malformed(context, e))?;
    if !response.success {
        return Err(api_error(error_code(&response.error_code), &response.message));
    }
    let result = response
        .result
        .ok_or_else(|| ExchangeError::malformed(context, "missing result"))?;
    serde_json::from_value(result).map_err(|e| ExchangeError::malformed(context, e))
}

fn exchange_order_id(order: &InFlightOrder) -> Result<&str, ExchangeError> {
    order.exchange_order_id.as_deref().ok_or_else(|| {
        ExchangeError::NotReady(format!(
            "order {} has no exchange id yet",
            order.client_order_id
        ))
    })
}

/// Order ids are numeric on the wire; keep unparseable ids as text.
fn order_id_value(id: &str) -> Value {
    id.parse::<u64>().map_or_else(|_| Value::from(id), Value::from)
}

fn side(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

/// P2B REST strategy. There is no per-order status endpoint: status is
/// derived from deal history plus the market's open orders, which are cached
/// briefly per market and dropped whenever this process places or cancels.
pub struct P2bRest<R: RestClient> {
    client: R,
    clock: Arc<dyn Clock>,
    status: Arc<StatusTable>,
    sequence: Arc<DepthSequence>,
    open_orders: TtlCache<String, Vec<P2bOpenOrder>>,
}

impl<R: RestClient> P2bRest<R> {
    pub fn new(
        client: R,
        clock: Arc<dyn Clock>,
        status: Arc<StatusTable>,
        sequence: Arc<DepthSequence>,
    ) -> Self {
        Self {
            client,
            open_orders: TtlCache::new(OPEN_ORDERS_TTL).with_clock(clock.clone()),
            clock,
            status,
            sequence,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, ExchangeError> {
        let raw = self
            .client
            .execute(endpoint, query, body)
            .await
            .map_err(classify_http_error)?;
        result(raw, &endpoint.path)
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<P2bOpenOrder>, ExchangeError> {
        let body = json!({ "market": symbol, "offset": 0, "limit": PAGE_LIMIT });
        self.call(&OPEN_ORDERS, &[], Some(&body)).await
    }

    async fn open_orders(&self, symbol: &str) -> Result<Fetched<Vec<P2bOpenOrder>>, ExchangeError> {
        self.open_orders
            .get_or_fetch_stamped(symbol.to_string(), || self.fetch_open_orders(symbol))
            .await
    }

    async fn deals(&self, exchange_order_id: &str) -> Result<Vec<P2bDeal>, ExchangeError> {
        let body = json!({
            "orderId": order_id_value(exchange_order_id),
            "offset": 0,
            "limit": PAGE_LIMIT,
        });
        let page: P2bDealPage = self.call(&ORDER_DEALS, &[], Some(&body)).await?;
        Ok(page.records)
    }
}

#[async_trait]
impl<R: RestClient> ExchangeRest for P2bRest<R> {
    #[instrument(skip(self), fields(exchange = "p2b"))]
    async fn exchange_info(&self) -> Result<ExchangeInfo, ExchangeError> {
        let markets: Vec<P2bMarket> = self.call(&MARKETS, &[], None).await?;
        Ok(conversions::exchange_info(markets))
    }

    async fn order_book_snapshot(
        &self,
        pair: &TradingPair,
        symbol: &str,
    ) -> Result<OrderBookSnapshot, ExchangeError> {
        let depth: P2bDepth = self
            .call(&DEPTH, &[("market", symbol), ("limit", SNAPSHOT_DEPTH)], None)
            .await?;
        Ok(OrderBookSnapshot::new(
            pair.clone(),
            self.sequence.next(symbol),
            parse_levels(&depth.bids, "bids")?,
            parse_levels(&depth.asks, "asks")?,
            self.clock.now_ms(),
        ))
    }

    async fn last_traded_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let tickers: P2bTickers = self.call(&TICKERS, &[], None).await?;
        Ok(tickers
            .into_iter()
            .filter_map(|(symbol, entry)| Some((symbol, entry.ticker.last?)))
            .collect())
    }

    #[instrument(skip(self, order), fields(exchange = "p2b", client_order_id = %order.client_order_id))]
    async fn place_order(
        &self,
        order: &InFlightOrder,
        symbol: &str,
    ) -> Result<PlaceOrderAck, ExchangeError> {
        let body = json!({
            "market": symbol,
            "side": side(order.side),
            "amount": order.amount.normalize().to_string(),
            "price": order.price.normalize().to_string(),
        });
        let placed = self.call::<P2bPlaceResult>(&PLACE_ORDER, &[], Some(&body)).await;
        self.open_orders.invalidate(&symbol.to_string());
        let placed = placed?;

        Ok(PlaceOrderAck {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: placed.order_id.0,
            timestamp: seconds_to_millis(placed.timestamp),
        })
    }

    async fn cancel_order(&self, order: &InFlightOrder, symbol: &str) -> Result<bool, ExchangeError> {
        let body = json!({
            "market": symbol,
            "orderId": order_id_value(exchange_order_id(order)?),
        });
        let canceled = self.call::<Value>(&CANCEL_ORDER, &[], Some(&body)).await;
        self.open_orders.invalidate(&symbol.to_string());
        canceled.map(|_| true)
    }

    async fn order_status(
        &self,
        order: &InFlightOrder,
        symbol: &str,
    ) -> Result<OrderUpdate, ExchangeError> {
        let id = exchange_order_id(order)?;
        let deals_fetched_at = self.clock.now_ms();
        let deals = self.deals(id).await?;
        let executed: Decimal = deals.iter().map(|d| d.amount).sum();

        // dated by the oldest data used, or the latest deal when that is later
        let (open, observed_at) = if executed >= order.amount {
            (Vec::new(), deals_fetched_at)
        } else {
            let open = self.open_orders(symbol).await?;
            (open.value, open.fetched_at.min(deals_fetched_at))
        };
        let last_deal = deals.iter().map(|d| seconds_to_millis(d.time)).max();
        let update_timestamp = last_deal.map_or(observed_at, |t| t.max(observed_at));

        let listed = open.iter().find(|o| o.order_id.0 == id);
        let status = derive_status(order.amount, &deals, listed);
        debug!(exchange_order_id = id, deals = deals.len(), listed = listed.is_some(), status, update_timestamp, "derived order status");

        Ok(OrderUpdate {
            client_order_id: Some(order.client_order_id.clone()),
            exchange_order_id: Some(id.to_string()),
            trading_pair: order.trading_pair.clone(),
            new_state: self.status.lookup(status)?,
            update_timestamp,
        })
    }

    async fn order_fills(
        &self,
        order: &InFlightOrder,
        _symbol: &str,
    ) -> Result<FillReport, ExchangeError> {
        let deals = self.deals(exchange_order_id(order)?).await?;
        Ok(FillReport::Trades(conversions::trade_updates(deals, order)))
    }

    async fn balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let raw: P2bBalances = self.call(&BALANCES, &[], Some(&json!({}))).await?;
        Ok(conversions::balances(raw))
    }
}
