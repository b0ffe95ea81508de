use cexbridge::core::config::{ConnectorSettings, ExchangeConfig};
use cexbridge::core::errors::ExchangeError;
use cexbridge::core::kernel::ManualClock;
use cexbridge::core::types::{OrderIntent, OrderSide, OrderState, OrderType, TradingPair};
use cexbridge::exchanges::coinstore::build_adapter_with_clock;
use cexbridge::ExchangeAdapter;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW_MS: i64 = 1_700_000_000_000;

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"code": 0, "message": "Success", "data": data}))
}

async fn mount_symbols(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v2/public/config/spot/symbols"))
        .respond_with(ok(json!([
            {"symbolCode": "BTCUSDT", "tradeCurrencyCode": "btc", "quoteCurrencyCode": "usdt",
             "openTrade": true, "tickSz": 2, "lotSz": 4, "minLmtSz": "0.0001", "minMktVa": "5"},
            {"symbolCode": "trxUSDT", "tradeCurrencyCode": "trx", "quoteCurrencyCode": "usdt",
             "openTrade": false, "tickSz": 6, "lotSz": 0, "minLmtSz": "1", "minMktVa": "5"}
        ])))
        .mount(server)
        .await;
}

fn adapter(server: &MockServer, config: ExchangeConfig) -> Arc<ExchangeAdapter> {
    let settings = ConnectorSettings::default().with_rest_max_retries(0);
    let clock = Arc::new(ManualClock::new(NOW_MS));
    Arc::new(build_adapter_with_clock(&config.base_url(server.uri()), settings, clock).unwrap())
}

fn btc_usdt() -> TradingPair {
    TradingPair::new("BTC", "USDT").unwrap()
}

#[tokio::test]
async fn test_metadata_keeps_open_symbols_only() {
    let server = MockServer::start().await;
    mount_symbols(&server).await;

    let adapter = adapter(&server, ExchangeConfig::read_only());
    adapter.refresh_metadata().await.unwrap();

    let rules = adapter.get_trading_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].trading_pair, btc_usdt());
    assert_eq!(rules[0].min_price_increment, dec!(0.01));
    assert_eq!(rules[0].min_base_amount_increment, dec!(0.0001));
    assert_eq!(rules[0].min_notional, dec!(5));
    assert_eq!(adapter.symbols().exchange_symbol(&btc_usdt()).unwrap(), "BTCUSDT");
}

#[tokio::test]
async fn test_rest_order_book_and_tickers() {
    let server = MockServer::start().await;
    mount_symbols(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/market/depth/BTCUSDT"))
        .and(query_param("depth", "20"))
        .respond_with(ok(json!({"a": [["101.5", "2"], ["101", "1"]], "b": [["99", "3"]]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/market/tickers"))
        .respond_with(ok(json!([
            {"symbol": "btcUSDT", "close": "100.5"},
            {"symbol": "ETHUSDT", "close": null}
        ])))
        .mount(&server)
        .await;

    let adapter = adapter(&server, ExchangeConfig::read_only());
    adapter.refresh_metadata().await.unwrap();

    let book = adapter.get_order_book(&btc_usdt()).await.unwrap();
    assert_eq!(book.best_ask().unwrap().price, dec!(101));
    assert_eq!(book.best_bid().unwrap().amount, dec!(3));
    assert_eq!(book.update_id, NOW_MS as u64);

    let prices = adapter.get_last_traded_prices(&[btc_usdt()]).await.unwrap();
    assert_eq!(prices[&btc_usdt()], dec!(100.5));
}

#[tokio::test]
async fn test_read_only_adapter_refuses_signed_calls() {
    let server = MockServer::start().await;
    mount_symbols(&server).await;
    let adapter = adapter(&server, ExchangeConfig::read_only());
    adapter.refresh_metadata().await.unwrap();

    assert!(matches!(
        adapter.get_balances().await,
        Err(ExchangeError::AuthError(_))
    ));
}

#[tokio::test]
async fn test_order_round_trip() {
    let server = MockServer::start().await;
    mount_symbols(&server).await;
    Mock::given(method("POST"))
        .and(path("/trade/order/place"))
        .and(header("X-CS-APIKEY", "key"))
        .and(header_exists("X-CS-SIGN"))
        .and(header("X-CS-EXPIRES", NOW_MS.to_string().as_str()))
        .and(body_partial_json(json!({
            "symbol": "BTCUSDT", "side": "BUY", "ordType": "LIMIT",
            "ordQty": "0.01", "ordPrice": "100"
        })))
        .respond_with(ok(json!({"ordId": 123456})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/trade/order/orderInfo"))
        .and(query_param("ordId", "123456"))
        .respond_with(ok(json!({
            "ordId": 123456, "ordStatus": "FILLED", "orderUpdateTime": NOW_MS + 1_000
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/trade/match/accountMatches"))
        .respond_with(ok(json!([
            {"orderId": 123456, "tradeId": 1, "execQty": "0.004", "execAmt": "0.4",
             "fee": "0.000004", "matchTime": NOW_MS + 500},
            {"orderId": 123456, "tradeId": 2, "execQty": "0.006", "execAmt": "0.6",
             "fee": "0.000006", "matchTime": NOW_MS + 900},
            {"orderId": 999, "tradeId": 3, "execQty": "1", "execAmt": "100",
             "fee": "0", "matchTime": NOW_MS}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/spot/accountList"))
        .respond_with(ok(json!([
            {"currency": "USDT", "balance": "90", "type": 1},
            {"currency": "USDT", "balance": "10", "type": 4},
            {"currency": "BTC", "balance": "0.01", "type": 1}
        ])))
        .mount(&server)
        .await;

    let adapter = adapter(&server, ExchangeConfig::new("key".into(), "secret".into()));
    adapter.refresh_metadata().await.unwrap();

    let ack = adapter
        .place_order(OrderIntent {
            trading_pair: btc_usdt(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: dec!(100),
            amount: dec!(0.01),
        })
        .await
        .unwrap();
    assert_eq!(ack.exchange_order_id, "123456");

    adapter.poll_once().await.unwrap();

    let order = adapter.order(&ack.client_order_id).unwrap();
    assert_eq!(order.state, OrderState::Filled);
    assert_eq!(order.executed_amount_base, dec!(0.01));
    assert_eq!(order.executed_amount_quote, dec!(1));
    assert!(adapter.in_flight_orders().is_empty());

    let balances = adapter.cached_balances();
    let usdt = balances.iter().find(|b| b.asset == "USDT").unwrap();
    assert_eq!(usdt.total, dec!(100));
    assert_eq!(usdt.available, dec!(90));
}

#[tokio::test]
async fn test_cancel_not_found_code_counts_as_canceled() {
    let server = MockServer::start().await;
    mount_symbols(&server).await;
    Mock::given(method("POST"))
        .and(path("/trade/order/place"))
        .respond_with(ok(json!({"ordId": "77"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/trade/order/cancel"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"code": 4003, "message": "order not exist"})),
        )
        .mount(&server)
        .await;

    let adapter = adapter(&server, ExchangeConfig::new("key".into(), "secret".into()));
    adapter.refresh_metadata().await.unwrap();
    let ack = adapter
        .place_order(OrderIntent {
            trading_pair: btc_usdt(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            price: dec!(200),
            amount: dec!(0.5),
        })
        .await
        .unwrap();

    assert!(adapter.cancel_order(&ack.client_order_id).await.unwrap());
    assert!(adapter.cancel_all(Duration::from_secs(1)).await.is_empty());
    assert_eq!(
        adapter.order(&ack.client_order_id).unwrap().state,
        OrderState::Canceled
    );
}
