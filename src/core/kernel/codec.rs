use crate::core::errors::ExchangeError;
use serde_json::Value;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Codec trait for exchange-specific WebSocket framing
///
/// Dispatch is shared: every JSON frame is first checked for an application
/// level heartbeat, then routed by [`WsCodec::channel_key`]. Frames with no
/// recognised channel (acks, welcome banners, unknown topics) are dropped.
pub trait WsCodec: Send + Sync {
    /// The canonical events this codec produces
    type Message: Send + 'static;

    /// Whether several streams can share one subscribe frame. When `false`
    /// the session sends one frame per stream.
    fn batch_subscribe(&self) -> bool {
        true
    }

    /// Stream names to subscribe to for `symbols` (exchange-native)
    fn streams_for(&self, symbols: &[String]) -> Vec<String> {
        symbols.to_vec()
    }

    /// Encode a subscription request for `streams`
    fn encode_subscription(&self, streams: &[String]) -> Result<Message, ExchangeError>;

    /// Reply required by an exchange-initiated heartbeat frame, if `frame` is one
    fn heartbeat_reply(&self, _frame: &Value) -> Option<Message> {
        None
    }

    /// Outcome of a login, if `frame` answers one. A rejected login is an
    /// [`ExchangeError::AuthError`].
    fn login_reply(&self, _frame: &Value) -> Option<Result<(), ExchangeError>> {
        None
    }

    /// Channel discriminator for a data frame; `None` when the frame carries no data
    fn channel_key(&self, frame: &Value) -> Option<&'static str>;

    /// Decode a frame already routed to `channel`
    fn decode_channel(
        &self,
        channel: &'static str,
        frame: Value,
    ) -> Result<Vec<Self::Message>, ExchangeError>;

    /// Decode one text frame into zero or more events
    fn decode_frame(&self, frame: Value) -> Result<Vec<Self::Message>, ExchangeError> {
        match self.channel_key(&frame) {
            Some(channel) => self.decode_channel(channel, frame),
            None => {
                debug!(frame = %frame, "dropping frame without a known channel");
                Ok(Vec::new())
            }
        }
    }
}

impl<C: WsCodec + ?Sized> WsCodec for Arc<C> {
    type Message = C::Message;

    fn batch_subscribe(&self) -> bool {
        (**self).batch_subscribe()
    }

    fn streams_for(&self, symbols: &[String]) -> Vec<String> {
        (**self).streams_for(symbols)
    }

    fn encode_subscription(&self, streams: &[String]) -> Result<Message, ExchangeError> {
        (**self).encode_subscription(streams)
    }

    fn heartbeat_reply(&self, frame: &Value) -> Option<Message> {
        (**self).heartbeat_reply(frame)
    }

    fn login_reply(&self, frame: &Value) -> Option<Result<(), ExchangeError>> {
        (**self).login_reply(frame)
    }

    fn channel_key(&self, frame: &Value) -> Option<&'static str> {
        (**self).channel_key(frame)
    }

    fn decode_channel(
        &self,
        channel: &'static str,
        frame: Value,
    ) -> Result<Vec<Self::Message>, ExchangeError> {
        (**self).decode_channel(channel, frame)
    }

    fn decode_frame(&self, frame: Value) -> Result<Vec<Self::Message>, ExchangeError> {
        (**self).decode_frame(frame)
    }
}

/// Parse a text or binary frame into JSON.
pub fn frame_to_json(message: &Message) -> Result<Option<Value>, ExchangeError> {
    let text = match message {
        Message::Text(text) => text.as_str(),
        Message::Binary(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| ExchangeError::malformed("binary frame", e))?,
        _ => return Ok(None),
    };
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| ExchangeError::malformed("ws frame", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoCodec;

    impl WsCodec for EchoCodec {
        type Message = String;

        fn encode_subscription(&self, streams: &[String]) -> Result<Message, ExchangeError> {
            Ok(Message::Text(json!({ "sub": streams }).to_string()))
        }

        fn channel_key(&self, frame: &Value) -> Option<&'static str> {
            frame.get("topic").and_then(Value::as_str).and_then(|t| match t {
                "echo" => Some("echo"),
                _ => None,
            })
        }

        fn decode_channel(&self, _channel: &'static str, frame: Value) -> Result<Vec<String>, ExchangeError> {
            frame["data"]
                .as_str()
                .map(|s| vec![s.to_string()])
                .ok_or_else(|| ExchangeError::malformed("echo", "missing data"))
        }
    }

    #[test]
    fn test_dispatch_by_channel_key() {
        let codec = Arc::new(EchoCodec);
        let decoded = codec
            .decode_frame(json!({"topic": "echo", "data": "hello"}))
            .unwrap();
        assert_eq!(decoded, vec!["hello".to_string()]);

        let ignored = codec.decode_frame(json!({"topic": "other"})).unwrap();
        assert!(ignored.is_empty());

        assert!(codec.decode_frame(json!({"topic": "echo"})).is_err());
    }

    #[test]
    fn test_frame_to_json() {
        let parsed = frame_to_json(&Message::Text(r#"{"a":1}"#.into())).unwrap();
        assert_eq!(parsed, Some(json!({"a": 1})));
        assert!(frame_to_json(&Message::Text("not json".into())).is_err());
        assert_eq!(frame_to_json(&Message::Ping(vec![])).unwrap(), None);
    }
}
