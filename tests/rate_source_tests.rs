use cexbridge::core::config::{ConnectorSettings, ExchangeConfig};
use cexbridge::core::kernel::ManualClock;
use cexbridge::core::types::TradingPair;
use cexbridge::exchanges::coinstore::build_adapter_with_clock;
use cexbridge::RateSource;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"code": 0, "message": "Success", "data": data}))
}

async fn rate_source(server: &MockServer, tickers_expected: u64) -> RateSource {
    Mock::given(method("POST"))
        .and(path("/v2/public/config/spot/symbols"))
        .respond_with(ok(json!([
            {"symbolCode": "BTCUSDT", "tradeCurrencyCode": "btc", "quoteCurrencyCode": "usdt",
             "openTrade": true, "tickSz": 2, "lotSz": 4, "minLmtSz": "0.0001", "minMktVa": "5"},
            {"symbolCode": "ETHUSDT", "tradeCurrencyCode": "eth", "quoteCurrencyCode": "usdt",
             "openTrade": true, "tickSz": 2, "lotSz": 4, "minLmtSz": "0.001", "minMktVa": "5"}
        ])))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/market/tickers"))
        .respond_with(ok(json!([
            {"symbol": "BTCUSDT", "close": "40000"},
            {"symbol": "ETHUSDT", "close": "2500"}
        ])))
        .expect(tickers_expected)
        .mount(server)
        .await;

    let config = ExchangeConfig::read_only().base_url(server.uri());
    let settings = ConnectorSettings::default().with_rest_max_retries(0);
    let adapter = build_adapter_with_clock(&config, settings, Arc::new(ManualClock::new(0))).unwrap();
    RateSource::new(Arc::new(adapter), Duration::from_secs(60))
}

fn pair(base: &str, quote: &str) -> TradingPair {
    TradingPair::new(base, quote).unwrap()
}

#[tokio::test]
async fn test_cached_prices_skip_the_exchange() {
    let server = MockServer::start().await;
    let source = rate_source(&server, 1).await;
    assert_eq!(source.exchange(), "coinstore");

    let first = source.prices(&[pair("BTC", "USDT"), pair("ETH", "USDT")]).await.unwrap();
    assert_eq!(first[&pair("BTC", "USDT")], dec!(40000));
    assert_eq!(first[&pair("ETH", "USDT")], dec!(2500));

    assert_eq!(source.price(&pair("ETH", "USDT")).await.unwrap(), Some(dec!(2500)));
}

#[tokio::test]
async fn test_invalidate_forces_a_refetch() {
    let server = MockServer::start().await;
    let source = rate_source(&server, 2).await;

    source.price(&pair("BTC", "USDT")).await.unwrap();
    source.invalidate();
    source.price(&pair("BTC", "USDT")).await.unwrap();
}

#[tokio::test]
async fn test_conversion_rates() {
    let server = MockServer::start().await;
    // the unlisted USDT-BTC market is looked up on each request
    let source = rate_source(&server, 2).await;

    assert_eq!(
        source.conversion_rate("BTC", "USDT").await.unwrap(),
        Some(dec!(40000))
    );
    assert_eq!(
        source.conversion_rate("USDT", "BTC").await.unwrap(),
        Some(dec!(0.000025))
    );
    assert_eq!(source.conversion_rate("usdt", "USDT").await.unwrap(), Some(dec!(1)));
}
