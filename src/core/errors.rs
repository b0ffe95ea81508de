use thiserror::Error;

/// Failure taxonomy shared by every connector.
///
/// The classification helpers (`is_transient`, `is_fatal`, ...) drive retry,
/// readiness and order-state decisions; exchange modules map their own error
/// codes onto these variants and anything they do not recognise stays an
/// [`ExchangeError::ApiError`].
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: i64, message: String },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Order book sequence gap for {trading_pair}: expected {expected}, got {received}")]
    SequenceGap {
        trading_pair: String,
        expected: u64,
        received: u64,
    },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Unknown trading pair: {0}")]
    UnknownTradingPair(String),

    #[error("Connector not ready: {0}")]
    NotReady(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// Timeouts, dropped connections and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_)
            | Self::Timeout(_)
            | Self::ServerError { .. }
            | Self::WebSocketError(_) => true,
            Self::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded(_))
    }

    /// Errors that take the connector out of service until an operator intervenes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthError(_) | Self::ConfigError(_))
    }

    pub fn is_order_not_found(&self) -> bool {
        matches!(self, Self::OrderNotFound(_))
    }

    pub fn malformed(context: &str, detail: impl std::fmt::Display) -> Self {
        Self::MalformedMessage(format!("{context}: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ExchangeError::Timeout("rest".into()).is_transient());
        assert!(ExchangeError::ServerError {
            status: 502,
            message: "bad gateway".into()
        }
        .is_transient());
        assert!(!ExchangeError::AuthError("bad signature".into()).is_transient());
        assert!(ExchangeError::AuthError("bad signature".into()).is_fatal());
        assert!(ExchangeError::OrderNotFound("c1".into()).is_order_not_found());
        assert!(ExchangeError::RateLimitExceeded("429".into()).is_rate_limited());

        let unclassified = ExchangeError::ApiError {
            code: 9999,
            message: "unexpected".into(),
        };
        assert!(!unclassified.is_transient());
        assert!(!unclassified.is_fatal());
        assert!(!unclassified.is_order_not_found());
    }
}
