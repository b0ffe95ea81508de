use crate::core::cache::TtlCache;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{Clock, Endpoint, RateLimitRule, RestClient};
use crate::core::status::StatusTable;
use crate::core::tracker::InFlightOrder;
use crate::core::traits::ExchangeRest;
use crate::core::types::{
    Balance, ExchangeInfo, FillReport, OrderBookSnapshot, OrderSide, OrderType, OrderUpdate,
    PlaceOrderAck, TradingPair,
};
use crate::exchanges::uzx::conversions::{self, levels, order_state, order_symbol, CANCELED};
use crate::exchanges::uzx::types::{
    UzxBalance, UzxDepth, UzxOrder, UzxPlaceResult, UzxProduct, UzxResponse, UzxTicker,
};
use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const SNAPSHOT_DEPTH: &str = "20";
const PAGE_SIZE: &str = "100";
const ORDER_LISTS_TTL: Duration = Duration::from_secs(10);

pub const IP_LIMIT: &str = "IP_LIMITING_RULE";
pub const USER_LIMIT: &str = "USER_LIMITING_RULE";

const PRODUCTS_PATH: &str = "/v2/products";
const DEPTH_PATH: &str = "/notification/spot/{symbol}/orderbook";
const TICKERS_PATH: &str = "/notification/spot/tickers";
const PLACE_PATH: &str = "/v2/trade/spot/order";
const CANCEL_PATH: &str = "/v2/trade/cancel-order";
const OPEN_ORDERS_PATH: &str = "/v2/trade/orders";
const ORDER_HISTORY_PATH: &str = "/v2/trade/history/orders";
const BALANCES_PATH: &str = "/v2/account/balances";

pub const PRODUCTS: Endpoint = Endpoint::public(Method::GET, PRODUCTS_PATH, PRODUCTS_PATH);
pub const DEPTH: Endpoint = Endpoint::public(Method::GET, DEPTH_PATH, DEPTH_PATH);
pub const TICKERS: Endpoint = Endpoint::public(Method::GET, TICKERS_PATH, TICKERS_PATH);
pub const PLACE_ORDER: Endpoint = Endpoint::signed(Method::POST, PLACE_PATH, PLACE_PATH);
pub const CANCEL_ORDER: Endpoint = Endpoint::signed(Method::POST, CANCEL_PATH, CANCEL_PATH);
pub const OPEN_ORDERS: Endpoint = Endpoint::signed_read(Method::GET, OPEN_ORDERS_PATH, OPEN_ORDERS_PATH);
pub const ORDER_HISTORY: Endpoint =
    Endpoint::signed_read(Method::GET, ORDER_HISTORY_PATH, ORDER_HISTORY_PATH);
pub const BALANCES: Endpoint = Endpoint::signed_read(Method::GET, BALANCES_PATH, BALANCES_PATH);

/// Two pools of ten per second: every call counts against the IP pool,
/// signed calls also against the account pool. Order entry is capped at
/// three per second on its own.
pub fn rate_limits() -> Vec<RateLimitRule> {
    let second = Duration::from_secs(1);
    let mut rules = vec![
        RateLimitRule::new(IP_LIMIT, 10, second),
        RateLimitRule::new(USER_LIMIT, 10, second),
    ];
    for id in [PRODUCTS_PATH, DEPTH_PATH, TICKERS_PATH] {
        rules.push(RateLimitRule::new(id, 10, second).linked(IP_LIMIT, 1));
    }
    for (id, capacity) in [
        (PLACE_PATH, 3),
        (CANCEL_PATH, 3),
        (OPEN_ORDERS_PATH, 10),
        (ORDER_HISTORY_PATH, 10),
        (BALANCES_PATH, 10),
    ] {
        rules.push(
            RateLimitRule::new(id, capacity, second)
                .linked(IP_LIMIT, 1)
                .linked(USER_LIMIT, 1),
        );
    }
    rules
}

fn envelope_error(response: &UzxResponse<Value>) -> ExchangeError {
    ExchangeError::ApiError {
        code: response.code.unwrap_or_default(),
        message: response.message.clone().unwrap_or_default(),
    }
}

/// Unwraps the envelope. Responses without `data` carry their fields at the
/// top level.
fn payload<T: DeserializeOwned>(raw: Value, context: &str) -> Result<T, ExchangeError> {
    let response =
        UzxResponse::<Value>::deserialize(&raw).map_err(|e| ExchangeError::malformed(context, e))?;
    if !response.is_success() {
        return Err(envelope_error(&response));
    }
    let body = response.data.unwrap_or(raw);
    serde_json::from_value(body).map_err(|e| ExchangeError::malformed(context, e))
}

/// Prefer the exchange's own code and message over the HTTP status.
fn classify_http_error(error: ExchangeError) -> ExchangeError {
    match error {
        ExchangeError::ApiError { code, message } => {
            match serde_json::from_str::<UzxResponse<Value>>(&message) {
                Ok(body) if body.message.is_some() => ExchangeError::ApiError {
                    code: body.code.unwrap_or(code),
                    message: body.message.unwrap_or_default(),
                },
                _ => ExchangeError::ApiError { code, message },
            }
        }
        other => other,
    }
}

fn exchange_order_id(order: &InFlightOrder) -> Result<&str, ExchangeError> {
    order.exchange_order_id.as_deref().ok_or_else(|| {
        ExchangeError::NotReady(format!(
            "order {} has no exchange id yet",
            order.client_order_id
        ))
    })
}

fn direction(side: OrderSide) -> u8 {
    match side {
        OrderSide::Buy => 1,
        OrderSide::Sell => 2,
    }
}

fn order_type_code(order_type: OrderType) -> u8 {
    match order_type {
        OrderType::Market => 1,
        OrderType::Limit => 2,
        OrderType::LimitMaker => 5,
    }
}

/// UZX REST strategy. Order state and fills come from the open and finished
/// order lists, each cached briefly per market and dropped whenever this
/// process places or cancels.
pub struct UzxRest<R: RestClient> {
    client: R,
    clock: Arc<dyn Clock>,
    status: Arc<StatusTable>,
    open_orders: TtlCache<String, Vec<UzxOrder>>,
    finished_orders: TtlCache<String, Vec<UzxOrder>>,
}

impl<R: RestClient> UzxRest<R> {
    pub fn new(client: R, clock: Arc<dyn Clock>, status: Arc<StatusTable>) -> Self {
        Self {
            client,
            status,
            open_orders: TtlCache::new(ORDER_LISTS_TTL).with_clock(clock.clone()),
            finished_orders: TtlCache::new(ORDER_LISTS_TTL).with_clock(clock.clone()),
            clock,
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
        payload(raw, &endpoint.path)
    }

    async fn fetch_orders(&self, finished: bool, market: &str) -> Result<Vec<UzxOrder>, ExchangeError> {
        let endpoint = if finished { ORDER_HISTORY } else { OPEN_ORDERS };
        self.call(
            &endpoint,
            &[("symbol", market), ("pageNo", "1"), ("pageSize", PAGE_SIZE)],
            None,
        )
        .await
    }

    fn invalidate_orders(&self, market: &str) {
        let market = market.to_string();
        self.open_orders.invalidate(&market);
        self.finished_orders.invalidate(&market);
    }

    /// The order as listed by the exchange, finished list first, and when
    /// the lists it was looked up in were fetched. An order on neither list
    /// is dated by the older of the two fetches.
    async fn find_order(
        &self,
        pair: &TradingPair,
        id: &str,
    ) -> Result<(Option<UzxOrder>, i64), ExchangeError> {
        let market = order_symbol(pair);
        let finished = self
            .finished_orders
            .get_or_fetch_stamped(market.clone(), || self.fetch_orders(true, &market))
            .await?;
        if let Some(order) = finished.value.into_iter().find(|o| o.order_id.0 == id) {
            return Ok((Some(order), finished.fetched_at));
        }
        let open = self
            .open_orders
            .get_or_fetch_stamped(market.clone(), || self.fetch_orders(false, &market))
            .await?;
        let listed = open.value.into_iter().find(|o| o.order_id.0 == id);
        let observed_at = if listed.is_some() {
            open.fetched_at
        } else {
            open.fetched_at.min(finished.fetched_at)
        };
        Ok((listed, observed_at))
    }
}

#[async_trait]
impl<R: RestClient> ExchangeRest for UzxRest<R> {
    #[instrument(skip(self), fields(exchange = "uzx"))]
    async fn exchange_info(&self) -> Result<ExchangeInfo, ExchangeError> {
        let products: Vec<UzxProduct> = self.call(&PRODUCTS, &[], None).await?;
        Ok(conversions::exchange_info(products))
    }

    async fn order_book_snapshot(
        &self,
        pair: &TradingPair,
        symbol: &str,
    ) -> Result<OrderBookSnapshot, ExchangeError> {
        let depth: UzxDepth = self
            .call(
                &DEPTH.with_symbol(symbol),
                &[("interval", "step0"), ("depth", SNAPSHOT_DEPTH)],
                None,
            )
            .await?;
        let now = self.clock.now_ms();
        Ok(OrderBookSnapshot::new(
            pair.clone(),
            now.max(0) as u64,
            levels(&depth.bid.items, "bids")?,
            levels(&depth.ask.items, "asks")?,
            now,
        ))
    }

    async fn last_traded_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let tickers: Vec<UzxTicker> = self.call(&TICKERS, &[], None).await?;
        Ok(tickers
            .into_iter()
            .filter_map(|ticker| Some((ticker.product_name, ticker.close?)))
            .collect())
    }

    #[instrument(skip(self, order), fields(exchange = "uzx", client_order_id = %order.client_order_id))]
    async fn place_order(
        &self,
        order: &InFlightOrder,
        _symbol: &str,
    ) -> Result<PlaceOrderAck, ExchangeError> {
        let market = order_symbol(&order.trading_pair);
        let mut body = json!({
            "symbol": market,
            "amount": order.amount.normalize().to_string(),
            "direction": direction(order.side),
            "type": order_type_code(order.order_type),
        });
        if order.order_type != OrderType::Market {
            body["price"] = Value::from(order.price.normalize().to_string());
        }

        let placed = self.call::<UzxPlaceResult>(&PLACE_ORDER, &[], Some(&body)).await;
        self.invalidate_orders(&market);
        let placed = placed?;

        Ok(PlaceOrderAck {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: placed.order_id.0,
            timestamp: placed.ser_time.unwrap_or_else(|| self.clock.now_ms()),
        })
    }

    async fn cancel_order(&self, order: &InFlightOrder, _symbol: &str) -> Result<bool, ExchangeError> {
        let body = json!({ "orderId": exchange_order_id(order)? });
        let canceled = self.call::<Value>(&CANCEL_ORDER, &[], Some(&body)).await;
        self.invalidate_orders(&order_symbol(&order.trading_pair));
        canceled.map(|_| true)
    }

    /// Orders on neither list have left the book unfilled. The update is
    /// dated by the list fetch, or by the exchange's finish time when later.
    async fn order_status(
        &self,
        order: &InFlightOrder,
        _symbol: &str,
    ) -> Result<OrderUpdate, ExchangeError> {
        let id = exchange_order_id(order)?;
        let (listed, observed_at) = self.find_order(&order.trading_pair, id).await?;
        let (new_state, update_timestamp) = match &listed {
            Some(found) => (
                order_state(&self.status, found.status)?,
                found.finished_at().map_or(observed_at, |t| t.max(observed_at)),
            ),
            None => (self.status.lookup(CANCELED)?, observed_at),
        };
        debug!(exchange_order_id = id, listed = listed.is_some(), state = %new_state, observed_at, "resolved order status");

        Ok(OrderUpdate {
            client_order_id: Some(order.client_order_id.clone()),
            exchange_order_id: Some(id.to_string()),
            trading_pair: order.trading_pair.clone(),
            new_state,
            update_timestamp,
        })
    }

    async fn order_fills(
        &self,
        order: &InFlightOrder,
        _symbol: &str,
    ) -> Result<FillReport, ExchangeError> {
        let id = exchange_order_id(order)?;
        let (listed, observed_at) = self.find_order(&order.trading_pair, id).await?;
        Ok(match listed {
            Some(found) => FillReport::Cumulative(conversions::cumulative_fill(
                &found,
                &order.trading_pair,
                observed_at,
            )),
            None => FillReport::Trades(Vec::new()),
        })
    }

    async fn balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let raw: Vec<UzxBalance> = self.call(&BALANCES, &[], None).await?;
        Ok(conversions::balances(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::RateLimiter;

    #[test]
    fn test_every_endpoint_has_a_rate_limit() {
        let limiter = RateLimiter::new(rate_limits());
        for endpoint in [
            PRODUCTS,
            DEPTH,
            TICKERS,
            PLACE_ORDER,
            CANCEL_ORDER,
            OPEN_ORDERS,
            ORDER_HISTORY,
            BALANCES,
        ] {
            assert!(limiter.has_rule(endpoint.limit_id), "{}", endpoint.path);
        }
    }

    #[test]
    fn test_signed_endpoints_draw_from_both_pools() {
        let rules = rate_limits();
        let place = rules.iter().find(|r| r.limit_id == PLACE_PATH).unwrap();
        assert_eq!(place.capacity, 3);
        assert_eq!(place.linked.len(), 2);
        let depth = rules.iter().find(|r| r.limit_id == DEPTH_PATH).unwrap();
        assert_eq!(depth.linked.len(), 1);
        assert_eq!(depth.linked[0].limit_id, IP_LIMIT);
    }

    #[test]
    fn test_depth_path_takes_symbol() {
        assert_eq!(
            DEPTH.with_symbol("BTCUSDT").path,
            "/notification/spot/BTCUSDT/orderbook"
        );
        assert_eq!(DEPTH.with_symbol("BTCUSDT").limit_id, DEPTH_PATH);
    }

    #[test]
    fn test_envelope_variants() {
        let products: Vec<Value> = payload(json!({"code": 200, "msg": "ok", "data": [1]}), "x").unwrap();
        assert_eq!(products, vec![json!(1)]);

        let placed: UzxPlaceResult =
            payload(json!({"success": true, "orderId": 123, "serTime": 1700000000000i64}), "x").unwrap();
        assert_eq!(placed.order_id.0, "123");

        let err = payload::<Value>(json!({"success": false, "code": 500, "message": "balance not enough"}), "x")
            .unwrap_err();
        assert!(matches!(err, ExchangeError::ApiError { code: 500, ref message } if message == "balance not enough"));

        assert!(payload::<Value>(json!({"code": 401, "msg": "bad key"}), "x").is_err());
    }

    #[test]
    fn test_http_error_body_is_unwrapped() {
        let err = classify_http_error(ExchangeError::ApiError {
            code: 400,
            message: r#"{"code":10001,"msg":"order not exist"}"#.into(),
        });
        assert!(matches!(err, ExchangeError::ApiError { code: 10001, .. }));
    }

    #[test]
    fn test_order_codes() {
        assert_eq!(direction(OrderSide::Buy), 1);
        assert_eq!(direction(OrderSide::Sell), 2);
        assert_eq!(order_type_code(OrderType::Market), 1);
        assert_eq!(order_type_code(OrderType::Limit), 2);
        assert_eq!(order_type_code(OrderType::LimitMaker), 5);
    }
}
