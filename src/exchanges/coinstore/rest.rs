use crate::core::errors::ExchangeError;
use crate::core::kernel::{Clock, Endpoint, RateLimitRule, RestClient};
use crate::core::status::StatusTable;
use crate::core::tracker::InFlightOrder;
use crate::core::traits::ExchangeRest;
use crate::core::types::{
    parse_levels, Balance, CancellationResult, ExchangeInfo, FillReport, OrderBookSnapshot,
    OrderType, OrderUpdate, PlaceOrderAck, TradingPair,
};
use crate::exchanges::coinstore::conversions;
use crate::exchanges::coinstore::types::{
    CoinstoreAccountEntry, CoinstoreBatchCancelResult, CoinstoreCancelResult, CoinstoreDepth,
    CoinstoreMatch, CoinstoreOrderInfo, CoinstorePlaceResult, CoinstoreResponse, CoinstoreSymbol,
    CoinstoreTicker,
};
use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub const ORDER_NOT_FOUND_CODE: i64 = 4003;
const SUCCESS_CODE: i64 = 0;
const SNAPSHOT_DEPTH: &str = "20";

pub const REQUEST_WEIGHT: &str = "REQUEST_WEIGHT";
pub const RAW_REQUESTS: &str = "RAW_REQUESTS";
const EXCHANGE_INFO_LIMIT: &str = "/v2/public/config/spot/symbols";
const SNAPSHOT_LIMIT: &str = "/v1/market/depth";
const TICKERS_LIMIT: &str = "/v1/market/tickers";
const PLACE_LIMIT: &str = "/trade/order/place";
const CANCEL_LIMIT: &str = "/trade/order/cancel";
const CANCEL_BATCH_LIMIT: &str = "/trade/order/cancelBatch";
const ORDER_INFO_LIMIT: &str = "/v2/trade/order/orderInfo";
const MATCHES_LIMIT: &str = "/trade/match/accountMatches";
const ACCOUNTS_LIMIT: &str = "/spot/accountList";
const USER_STREAM_LIMIT: &str = "/v1/userDataStream";

pub const EXCHANGE_INFO: Endpoint =
    Endpoint::public(Method::POST, "/v2/public/config/spot/symbols", EXCHANGE_INFO_LIMIT);
pub const DEPTH: Endpoint = Endpoint::public(Method::GET, "/v1/market/depth/{symbol}", SNAPSHOT_LIMIT);
pub const TICKERS: Endpoint = Endpoint::public(Method::GET, "/v1/market/tickers", TICKERS_LIMIT);
pub const PLACE_ORDER: Endpoint = Endpoint::signed(Method::POST, "/trade/order/place", PLACE_LIMIT);
pub const CANCEL_ORDER: Endpoint = Endpoint::signed(Method::POST, "/trade/order/cancel", CANCEL_LIMIT);
pub const CANCEL_BATCH: Endpoint =
    Endpoint::signed(Method::POST, "/trade/order/cancelBatch", CANCEL_BATCH_LIMIT);
pub const ORDER_INFO: Endpoint =
    Endpoint::signed_read(Method::GET, "/v2/trade/order/orderInfo", ORDER_INFO_LIMIT);
pub const ACCOUNT_MATCHES: Endpoint =
    Endpoint::signed_read(Method::GET, "/trade/match/accountMatches", MATCHES_LIMIT);
pub const ACCOUNT_LIST: Endpoint =
    Endpoint::signed_read(Method::POST, "/spot/accountList", ACCOUNTS_LIMIT);
pub const CREATE_LISTEN_KEY: Endpoint =
    Endpoint::signed(Method::POST, "/v1/userDataStream", USER_STREAM_LIMIT);
pub const KEEPALIVE_LISTEN_KEY: Endpoint =
    Endpoint::signed_read(Method::PUT, "/v1/userDataStream", USER_STREAM_LIMIT);
pub const CLOSE_LISTEN_KEY: Endpoint =
    Endpoint::signed(Method::DELETE, "/v1/userDataStream", USER_STREAM_LIMIT);

/// Every endpoint gets 120 calls per 3 s; depth snapshots also draw 4 units
/// from the per-minute request weight pool.
pub fn rate_limits() -> Vec<RateLimitRule> {
    let per_endpoint = Duration::from_secs(3);
    let mut rules = vec![
        RateLimitRule::new(REQUEST_WEIGHT, 120, Duration::from_secs(60)),
        RateLimitRule::new(RAW_REQUESTS, 120, Duration::from_secs(300)),
        RateLimitRule::new(SNAPSHOT_LIMIT, 120, Duration::from_secs(60))
            .linked(REQUEST_WEIGHT, 4)
            .linked(RAW_REQUESTS, 1),
    ];
    rules.extend(
        [
            EXCHANGE_INFO_LIMIT,
            TICKERS_LIMIT,
            PLACE_LIMIT,
            CANCEL_LIMIT,
            CANCEL_BATCH_LIMIT,
            ORDER_INFO_LIMIT,
            MATCHES_LIMIT,
            ACCOUNTS_LIMIT,
            USER_STREAM_LIMIT,
        ]
        .into_iter()
        .map(|id| RateLimitRule::new(id, 120, per_endpoint)),
    );
    rules
}

fn api_error(code: i64, message: Option<String>) -> ExchangeError {
    let message = message.unwrap_or_default();
    match code {
        ORDER_NOT_FOUND_CODE => ExchangeError::OrderNotFound(message),
        _ => ExchangeError::ApiError { code, message },
    }
}

/// Non-2xx bodies may still carry an exchange code worth classifying.
fn classify_http_error(error: ExchangeError) -> ExchangeError {
    match error {
        ExchangeError::ApiError { code, message } => {
            match serde_json::from_str::<CoinstoreResponse<Value>>(&message) {
                Ok(body) if body.code == ORDER_NOT_FOUND_CODE => api_error(body.code, body.message),
                _ => ExchangeError::ApiError { code, message },
            }
        }
        other => other,
    }
}

fn envelope(raw: Value, context: &str) -> Result<Option<Value>, ExchangeError> {
    let response: CoinstoreResponse<Value> =
        serde_json::from_value(raw).map_err(|e| ExchangeError::malformed(context, e))?;
    if response.code != SUCCESS_CODE {
        return Err(api_error(response.code, response.message));
    }
    Ok(response.data)
}

fn data<T: DeserializeOwned>(raw: Value, context: &str) -> Result<T, ExchangeError> {
    let data = envelope(raw, context)?
        .ok_or_else(|| ExchangeError::malformed(context, "missing data"))?;
    serde_json::from_value(data).map_err(|e| ExchangeError::malformed(context, e))
}

fn exchange_order_id(order: &InFlightOrder) -> Result<&str, ExchangeError> {
    order.exchange_order_id.as_deref().ok_or_else(|| {
        ExchangeError::NotReady(format!(
            "order {} has no exchange id yet",
            order.client_order_id
        ))
    })
}

fn order_type(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Limit | OrderType::LimitMaker => "LIMIT",
        OrderType::Market => "MARKET",
    }
}

/// Coinstore REST strategy over any [`RestClient`].
pub struct CoinstoreRest<R: RestClient> {
    client: R,
    clock: Arc<dyn Clock>,
    status: Arc<StatusTable>,
}

impl<R: RestClient> CoinstoreRest<R> {
    pub fn new(client: R, clock: Arc<dyn Clock>, status: Arc<StatusTable>) -> Self {
        Self {
            client,
            clock,
            status,
        }
    }

    async fn raw(
        &self,
        endpoint: &Endpoint,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ExchangeError> {
        self.client
            .execute(endpoint, query, body)
            .await
            .map_err(classify_http_error)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, ExchangeError> {
        let raw = self.raw(endpoint, query, body).await?;
        data(raw, &endpoint.path)
    }
}

#[async_trait]
impl<R: RestClient> ExchangeRest for CoinstoreRest<R> {
    #[instrument(skip(self), fields(exchange = "coinstore"))]
    async fn exchange_info(&self) -> Result<ExchangeInfo, ExchangeError> {
        let symbols: Vec<CoinstoreSymbol> = self.call(&EXCHANGE_INFO, &[], Some(&json!({}))).await?;
        Ok(conversions::exchange_info(symbols))
    }

    async fn order_book_snapshot(
        &self,
        pair: &TradingPair,
        symbol: &str,
    ) -> Result<OrderBookSnapshot, ExchangeError> {
        let depth: CoinstoreDepth = self
            .call(&DEPTH.with_symbol(symbol), &[("depth", SNAPSHOT_DEPTH)], None)
            .await?;
        let now = self.clock.now_ms();
        Ok(OrderBookSnapshot::new(
            pair.clone(),
            now.max(0) as u64,
            parse_levels(&depth.b, "bids")?,
            parse_levels(&depth.a, "asks")?,
            now,
        ))
    }

    async fn last_traded_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let tickers: Vec<CoinstoreTicker> = self.call(&TICKERS, &[], None).await?;
        Ok(tickers
            .into_iter()
            .filter_map(|t| Some((conversions::normalize_symbol(&t.symbol), t.close?)))
            .collect())
    }

    #[instrument(skip(self, order), fields(exchange = "coinstore", client_order_id = %order.client_order_id))]
    async fn place_order(
        &self,
        order: &InFlightOrder,
        symbol: &str,
    ) -> Result<PlaceOrderAck, ExchangeError> {
        let now = self.clock.now_ms();
        let mut body = json!({
            "symbol": symbol,
            "side": order.side.to_string(),
            "ordType": order_type(order.order_type),
            "ordQty": order.amount.normalize().to_string(),
            "clOrdId": order.client_order_id,
            "timestamp": now,
        });
        if order.order_type != OrderType::Market {
            body["ordPrice"] = json!(order.price.normalize().to_string());
        }

        let result: CoinstorePlaceResult = self.call(&PLACE_ORDER, &[], Some(&body)).await?;
        Ok(PlaceOrderAck {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: result.ord_id.0,
            timestamp: now,
        })
    }

    async fn cancel_order(&self, order: &InFlightOrder, symbol: &str) -> Result<bool, ExchangeError> {
        let body = json!({ "symbol": symbol, "ordId": exchange_order_id(order)? });
        let result: CoinstoreCancelResult = self.call(&CANCEL_ORDER, &[], Some(&body)).await?;
        Ok(result.state == "CANCELED")
    }

    async fn cancel_orders(
        &self,
        symbol: &str,
        orders: &[InFlightOrder],
    ) -> Result<Vec<CancellationResult>, ExchangeError> {
        let ids = orders
            .iter()
            .map(exchange_order_id)
            .collect::<Result<Vec<_>, _>>()?;
        let body = json!({ "symbol": symbol, "orderIds": ids });
        let result: CoinstoreBatchCancelResult = self.call(&CANCEL_BATCH, &[], Some(&body)).await?;

        let canceled: HashSet<String> = result.success.into_iter().map(|id| id.0).collect();
        debug!(canceled = canceled.len(), rejected = result.reject.len(), "batch cancel answered");
        Ok(orders
            .iter()
            .map(|order| CancellationResult {
                client_order_id: order.client_order_id.clone(),
                success: order
                    .exchange_order_id
                    .as_ref()
                    .is_some_and(|id| canceled.contains(id)),
            })
            .collect())
    }

    async fn order_status(
        &self,
        order: &InFlightOrder,
        _symbol: &str,
    ) -> Result<OrderUpdate, ExchangeError> {
        let info: CoinstoreOrderInfo = self
            .call(&ORDER_INFO, &[("ordId", exchange_order_id(order)?)], None)
            .await?;
        Ok(OrderUpdate {
            client_order_id: Some(order.client_order_id.clone()),
            exchange_order_id: Some(info.ord_id.0),
            trading_pair: order.trading_pair.clone(),
            new_state: self.status.lookup(&info.ord_status)?,
            update_timestamp: info.order_update_time,
        })
    }

    async fn order_fills(
        &self,
        order: &InFlightOrder,
        symbol: &str,
    ) -> Result<FillReport, ExchangeError> {
        let id = exchange_order_id(order)?;
        let matches: Vec<CoinstoreMatch> = self
            .call(&ACCOUNT_MATCHES, &[("symbol", symbol), ("ordId", id)], None)
            .await?;
        Ok(FillReport::Trades(conversions::trade_updates(
            matches,
            id,
            &order.client_order_id,
            &order.trading_pair,
        )))
    }

    async fn balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let entries: Vec<CoinstoreAccountEntry> =
            self.call(&ACCOUNT_LIST, &[], Some(&json!({}))).await?;
        Ok(conversions::balances(entries))
    }

    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        let raw = self.raw(&CREATE_LISTEN_KEY, &[], None).await?;
        let key = raw
            .get("listenKey")
            .or_else(|| raw.get("data").and_then(|data| data.get("listenKey")))
            .and_then(Value::as_str)
            .map(str::to_string);
        match key {
            Some(key) => Ok(key),
            None => {
                envelope(raw, "listen key")?;
                Err(ExchangeError::malformed("listen key", "missing listenKey"))
            }
        }
    }

    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<(), ExchangeError> {
        let raw = self
            .raw(&KEEPALIVE_LISTEN_KEY, &[("listenKey", listen_key)], None)
            .await?;
        check_optional_code(raw, "listen key keepalive")
    }

    async fn close_listen_key(&self, listen_key: &str) -> Result<(), ExchangeError> {
        let raw = self
            .raw(&CLOSE_LISTEN_KEY, &[("listenKey", listen_key)], None)
            .await?;
        check_optional_code(raw, "listen key close")
    }
}

/// Listen key maintenance answers `{}` on success and an envelope on failure.
fn check_optional_code(raw: Value, context: &str) -> Result<(), ExchangeError> {
    if raw.get("code").is_some() {
        envelope(raw, context)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::RateLimiter;

    #[test]
    fn test_every_endpoint_has_a_rate_limit() {
        let limiter = RateLimiter::new(rate_limits());
        for endpoint in [
            EXCHANGE_INFO,
            DEPTH,
            TICKERS,
            PLACE_ORDER,
            CANCEL_ORDER,
            CANCEL_BATCH,
            ORDER_INFO,
            ACCOUNT_MATCHES,
            ACCOUNT_LIST,
            CREATE_LISTEN_KEY,
            KEEPALIVE_LISTEN_KEY,
            CLOSE_LISTEN_KEY,
        ] {
            assert!(limiter.has_rule(endpoint.limit_id), "{}", endpoint.path);
        }
    }

    #[test]
    fn test_state_changing_endpoints_are_not_retried() {
        assert!(!PLACE_ORDER.is_retryable());
        assert!(!CANCEL_ORDER.is_retryable());
        assert!(!CANCEL_BATCH.is_retryable());
        assert!(ACCOUNT_LIST.is_retryable());
        assert!(DEPTH.is_retryable());
    }

    #[test]
    fn test_envelope_maps_not_found_code() {
        let err = data::<Value>(json!({"code": 4003, "message": "order not exist"}), "x").unwrap_err();
        assert!(err.is_order_not_found());

        let err = data::<Value>(json!({"code": 3101, "msg": "bad"}), "x").unwrap_err();
        assert!(matches!(err, ExchangeError::ApiError { code: 3101, .. }));

        let ok: Vec<u32> = data(json!({"code": 0, "data": [1, 2]}), "x").unwrap();
        assert_eq!(ok, vec![1, 2]);
    }

    #[test]
    fn test_http_error_body_is_classified() {
        let err = classify_http_error(ExchangeError::ApiError {
            code: 400,
            message: r#"{"code":4003,"message":"order not exist"}"#.into(),
        });
        assert!(err.is_order_not_found());

        let err = classify_http_error(ExchangeError::ApiError {
            code: 400,
            message: "plain text".into(),
        });
        assert!(matches!(err, ExchangeError::ApiError { code: 400, .. }));
    }
}
