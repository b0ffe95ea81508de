use crate::core::config::ConnectorSettings;
use crate::core::errors::ExchangeError;
use crate::core::kernel::clock::Clock;
use crate::core::kernel::codec::{frame_to_json, WsCodec};
use crate::core::kernel::signer::Signer;
use crate::core::kernel::ws::{TungsteniteWs, WsConfig, WsSession};
use crate::core::traits::{ExchangeRest, SessionModel};
use crate::core::types::UserEvent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

pub type UserCodec = Arc<dyn WsCodec<Message = UserEvent>>;

/// Readiness flags shared between the session task and its owner.
#[derive(Debug, Default)]
struct StreamHealth {
    ready: AtomicBool,
    failed: AtomicBool,
    last_activity_ms: AtomicI64,
    listen_key: Mutex<Option<String>>,
}

enum SessionEnd {
    Interrupted,
    ReceiverDropped,
}

/// Private order/balance stream.
///
/// Interruptions invalidate the session token, clear readiness, wait a
/// cooldown and reconnect. Authentication failures, or too many failed
/// session setups in a row, mark the stream failed for good.
pub struct UserStreamSource {
    inner: Arc<SessionRunner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct SessionRunner {
    exchange: &'static str,
    model: SessionModel,
    rest: Arc<dyn ExchangeRest>,
    codec: UserCodec,
    signer: Option<Arc<dyn Signer>>,
    clock: Arc<dyn Clock>,
    ws_config: WsConfig,
    cooldown: Duration,
    keepalive: Duration,
    max_failures: u32,
    channel_capacity: usize,
    health: StreamHealth,
}

impl UserStreamSource {
    pub fn new(
        exchange: &'static str,
        model: SessionModel,
        rest: Arc<dyn ExchangeRest>,
        codec: UserCodec,
        signer: Option<Arc<dyn Signer>>,
        clock: Arc<dyn Clock>,
        settings: &ConnectorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SessionRunner {
                exchange,
                model,
                rest,
                codec,
                signer,
                clock,
                ws_config: WsConfig::from_settings(settings),
                cooldown: settings.user_stream_cooldown(),
                keepalive: settings.listen_key_keepalive().max(Duration::from_secs(1)),
                max_failures: settings.max_reconnect_attempts.max(1),
                channel_capacity: settings.event_channel_capacity.max(1),
                health: StreamHealth::default(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the session loop; `symbols` are exchange-native.
    pub fn start(&self, symbols: Vec<String>) -> mpsc::Receiver<UserEvent> {
        self.abort_task();
        let health = &self.inner.health;
        health.failed.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        let runner = self.inner.clone();
        *self.task.lock() = Some(tokio::spawn(async move {
            runner.run(symbols, tx).await;
        }));
        rx
    }

    /// Stop the loop; an outstanding listen key is closed in the background.
    pub fn stop(&self) {
        self.abort_task();
        self.inner.health.ready.store(false, Ordering::SeqCst);
        self.inner.release_listen_key();
    }

    fn abort_task(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.health.ready.load(Ordering::SeqCst)
    }

    pub fn is_failed(&self) -> bool {
        self.inner.health.failed.load(Ordering::SeqCst)
    }

    /// Last event or successful connect, in milliseconds
    pub fn last_activity_ms(&self) -> i64 {
        self.inner.health.last_activity_ms.load(Ordering::SeqCst)
    }

    /// Ready and heard from within `staleness_ms`.
    pub fn is_fresh(&self, now_ms: i64, staleness_ms: i64) -> bool {
        self.is_ready() && now_ms - self.last_activity_ms() <= staleness_ms
    }
}

impl Drop for UserStreamSource {
    fn drop(&mut self) {
        self.abort_task();
    }
}

impl SessionRunner {
    async fn run(&self, symbols: Vec<String>, tx: mpsc::Sender<UserEvent>) {
        let streams = self.codec.streams_for(&symbols);
        let mut failures = 0u32;

        loop {
            match self.session(&streams, &tx).await {
                Ok(SessionEnd::ReceiverDropped) => {
                    debug!(exchange = self.exchange, "user stream receiver dropped");
                    break;
                }
                Ok(SessionEnd::Interrupted) => {
                    failures = 0;
                    warn!(exchange = self.exchange, "user stream interrupted, reconnecting");
                }
                Err(e) if e.is_fatal() => {
                    error!(exchange = self.exchange, error = %e, "user stream authentication failed");
                    self.health.failed.store(true, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    failures += 1;
                    warn!(exchange = self.exchange, failures, error = %e, "user stream session failed");
                    if failures >= self.max_failures {
                        error!(exchange = self.exchange, failures, "user stream giving up");
                        self.health.failed.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }

            self.health.ready.store(false, Ordering::SeqCst);
            self.release_listen_key();
            sleep(self.cooldown).await;
        }

        self.health.ready.store(false, Ordering::SeqCst);
        self.release_listen_key();
    }

    /// One connection lifetime. Setup failures are errors; a drop after the
    /// stream was live is an interruption.
    #[instrument(skip(self, streams, tx), fields(exchange = self.exchange))]
    async fn session(
        &self,
        streams: &[String],
        tx: &mpsc::Sender<UserEvent>,
    ) -> Result<SessionEnd, ExchangeError> {
        let (url, listen_key) = match &self.model {
            SessionModel::ListenKey { url_template } => {
                let key = self.rest.create_listen_key().await?;
                *self.health.listen_key.lock() = Some(key.clone());
                (url_template.replace("{listen_key}", &key), Some(key))
            }
            SessionModel::PersistentLogin { url } => (url.clone(), None),
        };

        let mut ws = TungsteniteWs::new(url, self.exchange.to_string(), self.codec.clone())
            .with_config(self.ws_config.clone());
        ws.connect().await?;

        if let SessionModel::PersistentLogin { .. } = self.model {
            let signer = self.signer.as_ref().ok_or_else(|| {
                ExchangeError::AuthError("private stream requires credentials".to_string())
            })?;
            let timestamp = self.clock.now_ms().max(0) as u64;
            if let Some(login) = signer.sign_ws_login(timestamp)? {
                ws.send_raw(Message::Text(login.to_string())).await?;
                self.await_login(&mut ws).await?;
            }
        }
        ws.subscribe(streams).await?;

        self.health.ready.store(true, Ordering::SeqCst);
        self.touch();
        info!("user stream connected");

        let mut keepalive = interval_at(Instant::now() + self.keepalive, self.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = ws.next_message() => match next {
                    Some(Ok(event)) => {
                        self.touch();
                        if tx.send(event).await.is_err() {
                            let _ = ws.close().await;
                            return Ok(SessionEnd::ReceiverDropped);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "user stream read failed");
                        return Ok(SessionEnd::Interrupted);
                    }
                    None => return Ok(SessionEnd::Interrupted),
                },
                _ = keepalive.tick(), if listen_key.is_some() => {
                    if let Some(key) = &listen_key {
                        let refreshed = match self.rest.keepalive_listen_key(key).await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(error = %e, "listen key keepalive failed");
                                false
                            }
                        };
                        if !refreshed {
                            let _ = ws.close().await;
                            return Ok(SessionEnd::Interrupted);
                        }
                        debug!("listen key refreshed");
                    }
                }
            }
        }
    }

    /// Read frames until the exchange answers the login, within the connect
    /// timeout. Heartbeats are answered; anything else is dropped.
    async fn await_login(&self, ws: &mut TungsteniteWs<UserCodec>) -> Result<(), ExchangeError> {
        let limit = self.ws_config.connect_timeout;
        let reply = timeout(limit, async {
            loop {
                let message = match ws.next_raw().await {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(ExchangeError::WebSocketError(
                            "closed before login reply".to_string(),
                        ))
                    }
                };
                let frame = match frame_to_json(&message) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => continue,
                    Err(e) => return Err(e),
                };
                if let Some(pong) = self.codec.heartbeat_reply(&frame) {
                    if let Err(e) = ws.send_raw(pong).await {
                        return Err(e);
                    }
                    continue;
                }
                match self.codec.login_reply(&frame) {
                    Some(outcome) => return outcome,
                    None => debug!(%frame, "frame before login reply dropped"),
                }
            }
        })
        .await;

        match reply {
            Ok(outcome) => {
                if outcome.is_ok() {
                    debug!("login accepted");
                }
                outcome
            }
            Err(_) => Err(ExchangeError::Timeout(format!(
                "no login reply within {}ms",
                limit.as_millis()
            ))),
        }
    }

    fn touch(&self) {
        self.health
            .last_activity_ms
            .store(self.clock.now_ms(), Ordering::SeqCst);
    }

    /// Forget the current listen key and close it without blocking.
    fn release_listen_key(&self) {
        let Some(key) = self.health.listen_key.lock().take() else {
            return;
        };
        let rest = self.rest.clone();
        let exchange = self.exchange;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = rest.close_listen_key(&key).await {
                    debug!(exchange, error = %e, "listen key close failed");
                }
            });
        }
    }
}
