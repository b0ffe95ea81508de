use crate::core::config::ConnectorSettings;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{frame_to_json, WsCodec};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub connect_timeout: Duration,
    /// A socket that delivers nothing for this long is considered dead
    pub idle_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self::from_settings(&ConnectorSettings::default())
    }
}

impl WsConfig {
    pub fn from_settings(settings: &ConnectorSettings) -> Self {
        Self {
            connect_timeout: settings.ws_connect_timeout(),
            idle_timeout: settings.ws_idle_timeout(),
            reconnect_base_delay: settings.reconnect_base_delay(),
            reconnect_max_delay: settings.reconnect_max_delay(),
            max_reconnect_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// WebSocket session trait - transport plus codec dispatch
#[async_trait]
pub trait WsSession<C: WsCodec>: Send {
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Next data frame; control frames are answered internally
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    async fn close(&mut self) -> Result<(), ExchangeError>;

    fn is_connected(&self) -> bool;

    /// Subscribe to streams using the codec
    async fn subscribe(&mut self, streams: &[String]) -> Result<(), ExchangeError>;

    /// Next decoded event; malformed frames are logged and skipped
    async fn next_message(&mut self) -> Option<Result<C::Message, ExchangeError>>;

    /// Incremented on every successful connect
    fn connection_epoch(&self) -> u64;
}

/// Tungstenite-based WebSocket session
pub struct TungsteniteWs<C: WsCodec> {
    url: String,
    write: Option<SplitSink<WsStream, Message>>,
    read: Option<SplitStream<WsStream>>,
    connected: bool,
    exchange_name: String,
    codec: C,
    config: WsConfig,
    pending: VecDeque<C::Message>,
    epoch: u64,
}

impl<C: WsCodec> TungsteniteWs<C> {
    pub fn new(url: String, exchange_name: String, codec: C) -> Self {
        Self {
            url,
            write: None,
            read: None,
            connected: false,
            exchange_name,
            codec,
            config: WsConfig::default(),
            pending: VecDeque::new(),
            epoch: 0,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn mark_disconnected(&mut self) {
        self.connected = false;
        self.write = None;
        self.read = None;
    }
}

#[async_trait]
impl<C: WsCodec> WsSession<C> for TungsteniteWs<C> {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let (ws_stream, _) = timeout(self.config.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| ExchangeError::Timeout("WebSocket connection timeout".to_string()))?
            .map_err(|e| {
                ExchangeError::WebSocketError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;
        self.pending.clear();
        self.epoch += 1;
        debug!(epoch = self.epoch, "websocket connected");
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        let write = self.write.as_mut().ok_or_else(|| {
            ExchangeError::WebSocketError("WebSocket not connected".to_string())
        })?;

        if let Err(e) = write.send(msg).await {
            self.mark_disconnected();
            return Err(ExchangeError::WebSocketError(format!(
                "Failed to send WebSocket message: {}",
                e
            )));
        }
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            let idle_timeout = self.config.idle_timeout;
            let next = {
                let read = self.read.as_mut()?;
                timeout(idle_timeout, read.next()).await
            };

            match next {
                Err(_) => {
                    warn!(exchange = %self.exchange_name, "no websocket data within idle timeout");
                    self.mark_disconnected();
                    return Some(Err(ExchangeError::Timeout(format!(
                        "no data for {}ms",
                        idle_timeout.as_millis()
                    ))));
                }
                Ok(Some(Ok(message))) => match message {
                    Message::Ping(payload) => {
                        if let Err(e) = self.send_raw(Message::Pong(payload)).await {
                            warn!("Failed to send pong response: {}", e);
                        }
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                    Message::Close(frame) => {
                        debug!(exchange = %self.exchange_name, ?frame, "websocket closed by peer");
                        self.mark_disconnected();
                        return None;
                    }
                    data => return Some(Ok(data)),
                },
                Ok(Some(Err(e))) => {
                    self.mark_disconnected();
                    return Some(Err(ExchangeError::WebSocketError(e.to_string())));
                }
                Ok(None) => {
                    self.mark_disconnected();
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.mark_disconnected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    #[instrument(skip(self, streams), fields(exchange = %self.exchange_name, stream_count = streams.len()))]
    async fn subscribe(&mut self, streams: &[String]) -> Result<(), ExchangeError> {
        if streams.is_empty() {
            return Ok(());
        }

        if self.codec.batch_subscribe() {
            let message = self.codec.encode_subscription(streams)?;
            return self.send_raw(message).await;
        }

        for stream in streams {
            let message = self.codec.encode_subscription(std::slice::from_ref(stream))?;
            self.send_raw(message).await?;
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<C::Message, ExchangeError>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(Ok(message));
            }

            let raw = match self.next_raw().await? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(e)),
            };

            let frame = match frame_to_json(&raw) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    warn!(exchange = %self.exchange_name, error = %e, "dropping malformed frame");
                    continue;
                }
            };

            if let Some(reply) = self.codec.heartbeat_reply(&frame) {
                if let Err(e) = self.send_raw(reply).await {
                    return Some(Err(e));
                }
                continue;
            }

            match self.codec.decode_frame(frame) {
                Ok(events) => self.pending.extend(events),
                Err(e) => {
                    warn!(exchange = %self.exchange_name, error = %e, "dropping undecodable frame");
                }
            }
        }
    }

    fn connection_epoch(&self) -> u64 {
        self.epoch
    }
}

/// Exponential backoff with up to 25% jitter, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(max);
    let jitter_ms = capped.as_millis() as u64 / 4;
    if jitter_ms == 0 {
        return capped;
    }
    capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

/// Wrapper that adds automatic reconnection and resubscription
pub struct ReconnectWs<C: WsCodec, T: WsSession<C>> {
    inner: T,
    config: WsConfig,
    subscribed_streams: Vec<String>,
    _codec: std::marker::PhantomData<C>,
}

impl<C: WsCodec, T: WsSession<C>> ReconnectWs<C, T> {
    pub fn new(inner: T, config: WsConfig) -> Self {
        Self {
            inner,
            config,
            subscribed_streams: Vec::new(),
            _codec: std::marker::PhantomData,
        }
    }

    async fn attempt_reconnect(&mut self) -> Result<(), ExchangeError> {
        let _ = self.inner.close().await;

        for attempt in 1..=self.config.max_reconnect_attempts {
            let delay = backoff_delay(
                self.config.reconnect_base_delay,
                self.config.reconnect_max_delay,
                attempt,
            );
            sleep(delay).await;

            match self.inner.connect().await {
                Ok(()) => {
                    if !self.subscribed_streams.is_empty() {
                        let streams = self.subscribed_streams.clone();
                        if let Err(e) = self.inner.subscribe(&streams).await {
                            warn!("Failed to resubscribe after reconnection: {}", e);
                            continue;
                        }
                    }
                    info!(attempt, "websocket reconnected");
                    return Ok(());
                }
                Err(e) => {
                    error!("Reconnection attempt {} failed: {}", attempt, e);
                }
            }
        }

        Err(ExchangeError::WebSocketError(format!(
            "Failed to reconnect after {} attempts",
            self.config.max_reconnect_attempts
        )))
    }
}

#[async_trait]
impl<C: WsCodec, T: WsSession<C>> WsSession<C> for ReconnectWs<C, T> {
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        self.inner.connect().await
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.inner.is_connected() {
            self.attempt_reconnect().await?;
        }
        self.inner.send_raw(msg).await
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            if !self.inner.is_connected() {
                if let Err(e) = self.attempt_reconnect().await {
                    return Some(Err(e));
                }
            }

            match self.inner.next_raw().await {
                Some(Ok(msg)) => return Some(Ok(msg)),
                Some(Err(e)) => warn!(error = %e, "websocket read failed, reconnecting"),
                None => warn!("websocket stream ended, reconnecting"),
            }
            if let Err(e) = self.attempt_reconnect().await {
                return Some(Err(e));
            }
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.inner.close().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn subscribe(&mut self, streams: &[String]) -> Result<(), ExchangeError> {
        self.subscribed_streams = streams.to_vec();
        self.inner.subscribe(streams).await
    }

    async fn next_message(&mut self) -> Option<Result<C::Message, ExchangeError>> {
        loop {
            if !self.inner.is_connected() {
                if let Err(e) = self.attempt_reconnect().await {
                    return Some(Err(e));
                }
            }

            match self.inner.next_message().await {
                Some(Ok(msg)) => return Some(Ok(msg)),
                Some(Err(e)) => warn!(error = %e, "websocket read failed, reconnecting"),
                None => warn!("websocket stream ended, reconnecting"),
            }
            if let Err(e) = self.attempt_reconnect().await {
                return Some(Err(e));
            }
        }
    }

    fn connection_epoch(&self) -> u64 {
        self.inner.connection_epoch()
    }
}
