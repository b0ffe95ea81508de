use cexbridge::core::config::ConnectorSettings;
use cexbridge::core::kernel::{Clock, ManualClock, RestClientBuilder, RestClientConfig, Signer};
use cexbridge::core::status::StatusTable;
use cexbridge::core::symbols::{SymbolMap, SymbolRegistry};
use cexbridge::core::traits::{ExchangeRest, SessionModel};
use cexbridge::core::types::{TradingPair, UserEvent};
use cexbridge::core::user_stream::{UserCodec, UserStreamSource};
use cexbridge::exchanges::{coinstore, uzx};
use futures::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW_MS: i64 = 1_700_000_000_000;

struct Relay {
    url: String,
    /// Request line the client connected with
    uri: oneshot::Receiver<String>,
    /// Text frames sent by the client, in order
    frames: mpsc::Receiver<Value>,
}

/// Accepts one client, waits for `expect_frames` frames, then pushes `pushes`
/// and keeps the socket open. A login frame is answered with `login_reply`.
async fn relay(expect_frames: usize, login_reply: Option<Value>, pushes: Vec<Value>) -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (uri_tx, uri) = oneshot::channel();
    let (frames_tx, frames) = mpsc::channel(16);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        })
        .await
        .unwrap();
        for _ in 0..expect_frames {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["event"] == "login" {
                        if let Some(reply) = &login_reply {
                            ws.send(Message::Text(reply.to_string())).await.unwrap();
                        }
                    }
                    let _ = frames_tx.send(frame).await;
                }
                _ => return,
            }
        }
        for push in pushes {
            ws.send(Message::Text(push.to_string())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    Relay { url, uri, frames }
}

fn registry() -> SymbolRegistry {
    let symbols = SymbolRegistry::new();
    symbols.replace(SymbolMap::from_entries([(
        "BTCUSDT".to_string(),
        TradingPair::new("BTC", "USDT").unwrap(),
    )]));
    symbols
}

fn settings() -> ConnectorSettings {
    let mut settings = ConnectorSettings::default().with_rest_max_retries(0);
    settings.user_stream_cooldown_ms = 10;
    settings
}

fn uzx_source(url: String, signer: Option<Arc<dyn Signer>>) -> UserStreamSource {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW_MS));
    let status: Arc<StatusTable> = Arc::new(uzx::conversions::status_table().unwrap());
    let client = RestClientBuilder::new(RestClientConfig::new("http://127.0.0.1:9", "uzx"))
        .build()
        .unwrap();
    let rest: Arc<dyn ExchangeRest> = Arc::new(uzx::UzxRest::new(client, clock.clone(), status.clone()));
    let codec: UserCodec = Arc::new(uzx::UzxUserCodec::new(registry(), status, clock.clone()));
    UserStreamSource::new(
        "uzx",
        SessionModel::PersistentLogin { url },
        rest,
        codec,
        signer,
        clock,
        &settings(),
    )
}

async fn next_event(events: &mut mpsc::Receiver<UserEvent>) -> UserEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("user event within five seconds")
        .expect("user stream open")
}

#[tokio::test]
async fn test_login_precedes_subscriptions() {
    let mut relay = relay(
        3,
        Some(json!({"event": "login", "status": "ok"})),
        vec![json!({
            "type": "spot.balance", "ts": NOW_MS,
            "data": [{"coin": {"unit": "usdt"}, "balance": "4", "totalBalance": "6"}]
        })],
    )
    .await;
    let signer: Arc<dyn Signer> = Arc::new(uzx::UzxSigner::new("key", "secret").unwrap());
    let source = uzx_source(relay.url.clone(), Some(signer));

    let mut events = source.start(vec!["BTCUSDT".to_string()]);

    let login = relay.frames.recv().await.unwrap();
    assert_eq!(login["event"], "login");
    assert_eq!(login["params"]["apiKey"], "key");
    assert_eq!(login["params"]["timestamp"], "1700000000");
    let orders = relay.frames.recv().await.unwrap();
    assert_eq!(orders["params"]["type"], "spot.order");
    assert_eq!(orders["params"]["symbol"], "BTCUSDT");
    let balances = relay.frames.recv().await.unwrap();
    assert_eq!(balances["params"]["type"], "spot.balance");

    match next_event(&mut events).await {
        UserEvent::Balance(balance) => {
            assert_eq!(balance.asset, "USDT");
            assert_eq!(balance.total, dec!(6));
            assert_eq!(balance.available, dec!(4));
        }
        other => panic!("expected a balance, got {other:?}"),
    }
    assert!(source.is_ready());
    assert_eq!(source.last_activity_ms(), NOW_MS);
    assert!(source.is_fresh(NOW_MS + 1_000, 60_000));
    assert!(!source.is_fresh(NOW_MS + 61_000, 60_000));

    source.stop();
    assert!(!source.is_ready());
    assert!(!source.is_failed());
}

#[tokio::test]
async fn test_login_without_credentials_fails_for_good() {
    let relay = relay(0, None, Vec::new()).await;
    let source = uzx_source(relay.url.clone(), None);

    let mut events = source.start(vec!["BTCUSDT".to_string()]);

    // the session task ends and drops its sender
    let closed = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert!(closed.is_none());
    assert!(source.is_failed());
    assert!(!source.is_ready());
}

#[tokio::test]
async fn test_rejected_login_fails_for_good() {
    let mut relay = relay(
        1,
        Some(json!({"event": "login", "status": "error", "msg": "invalid sign"})),
        Vec::new(),
    )
    .await;
    let signer: Arc<dyn Signer> = Arc::new(uzx::UzxSigner::new("key", "bad-secret").unwrap());
    let source = uzx_source(relay.url.clone(), Some(signer));

    let mut events = source.start(vec!["BTCUSDT".to_string()]);

    let login = relay.frames.recv().await.unwrap();
    assert_eq!(login["event"], "login");
    let closed = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert!(closed.is_none());
    assert!(source.is_failed());
    assert!(!source.is_ready());
    // nothing is subscribed after a rejection
    assert!(timeout(Duration::from_millis(100), relay.frames.recv())
        .await
        .map_or(true, |frame| frame.is_none()));
}

#[tokio::test]
async fn test_stream_is_not_ready_until_login_is_answered() {
    let mut relay = relay(1, None, Vec::new()).await;
    let signer: Arc<dyn Signer> = Arc::new(uzx::UzxSigner::new("key", "secret").unwrap());
    let source = uzx_source(relay.url.clone(), Some(signer));

    let _events = source.start(vec!["BTCUSDT".to_string()]);

    let login = relay.frames.recv().await.unwrap();
    assert_eq!(login["event"], "login");
    sleep(Duration::from_millis(100)).await;
    assert!(!source.is_ready());
    assert!(!source.is_failed());
    source.stop();
}

#[tokio::test]
async fn test_listen_key_in_url_and_closed_on_stop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/userDataStream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 0, "data": {"listenKey": "lk-1"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/userDataStream"))
        .and(query_param("listenKey", "lk-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay(
        0,
        None,
        vec![json!({"e": "outboundAccountPosition", "B": [{"a": "btc", "f": "1", "l": "0.5"}]})],
    )
    .await;

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW_MS));
    let status = Arc::new(coinstore::conversions::status_table().unwrap());
    let signer: Arc<dyn Signer> = Arc::new(coinstore::CoinstoreSigner::new("key", "secret").unwrap());
    let client = RestClientBuilder::new(
        RestClientConfig::new(server.uri(), "coinstore").with_max_retries(0),
    )
    .with_signer(signer.clone())
    .with_clock(clock.clone())
    .build()
    .unwrap();
    let rest: Arc<dyn ExchangeRest> =
        Arc::new(coinstore::CoinstoreRest::new(client, clock.clone(), status.clone()));
    let codec: UserCodec = Arc::new(coinstore::CoinstoreUserCodec::new(registry(), status));
    let source = UserStreamSource::new(
        "coinstore",
        SessionModel::ListenKey {
            url_template: format!("{}/?listenKey={{listen_key}}", relay.url),
        },
        rest,
        codec,
        Some(signer),
        clock,
        &settings(),
    );

    let mut events = source.start(vec!["BTCUSDT".to_string()]);
    match next_event(&mut events).await {
        UserEvent::Balance(balance) => {
            assert_eq!(balance.asset, "BTC");
            assert_eq!(balance.total, dec!(1.5));
        }
        other => panic!("expected a balance, got {other:?}"),
    }
    let uri = relay.uri.await.unwrap();
    assert!(uri.ends_with("listenKey=lk-1"), "{uri}");

    source.stop();
    for _ in 0..200 {
        if server.received_requests().await.unwrap_or_default().len() >= 2 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
}
