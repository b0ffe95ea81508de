use crate::core::config::ConnectorSettings;
use crate::core::errors::ExchangeError;
use crate::core::kernel::clock::{Clock, SystemClock};
use crate::core::kernel::rate_limit::RateLimiter;
use crate::core::kernel::signer::Signer;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{instrument, trace, warn};

/// Declarative description of one REST endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    /// Path relative to the base URL; may contain a `{symbol}` placeholder
    pub path: Cow<'static, str>,
    pub auth: bool,
    /// Safe to replay after a transient failure
    pub idempotent: bool,
    /// Rule consulted in the `RateLimiter` before every attempt
    pub limit_id: &'static str,
}

impl Endpoint {
    pub const fn public(method: Method, path: &'static str, limit_id: &'static str) -> Self {
        Self {
            method,
            path: Cow::Borrowed(path),
            auth: false,
            idempotent: true,
            limit_id,
        }
    }

    /// Signed endpoint that changes exchange state (never replayed)
    pub const fn signed(method: Method, path: &'static str, limit_id: &'static str) -> Self {
        Self {
            method,
            path: Cow::Borrowed(path),
            auth: true,
            idempotent: false,
            limit_id,
        }
    }

    /// Signed read-only endpoint, e.g. a balance query sent as POST
    pub const fn signed_read(method: Method, path: &'static str, limit_id: &'static str) -> Self {
        Self {
            method,
            path: Cow::Borrowed(path),
            auth: true,
            idempotent: true,
            limit_id,
        }
    }

    #[must_use]
    pub fn with_symbol(&self, symbol: &str) -> Self {
        Self {
            path: Cow::Owned(self.path.replace("{symbol}", symbol)),
            ..self.clone()
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.idempotent || self.method == Method::GET
    }
}

/// REST client trait for making HTTP requests
///
/// One entry point per call: the endpoint descriptor decides signing,
/// rate limiting and retry behaviour.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Issue a request and return the raw JSON body
    ///
    /// # Arguments
    /// * `endpoint` - Endpoint descriptor (path already resolved)
    /// * `query_params` - Query parameters as key-value pairs
    /// * `body` - Optional JSON body
    async fn execute(
        &self,
        endpoint: &Endpoint,
        query_params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ExchangeError>;

    /// Same as [`RestClient::execute`], deserialized into `T`
    async fn execute_json<T: DeserializeOwned + Send>(
        &self,
        endpoint: &Endpoint,
        query_params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, ExchangeError>;
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    pub timeout: Duration,
    /// Retries after the first attempt, idempotent endpoints only
    pub max_retries: usize,
    pub retry_base_ms: u64,
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            exchange_name: exchange_name.into(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_ms: 100,
            user_agent: concat!("cexbridge/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn from_settings(
        base_url: impl Into<String>,
        exchange_name: impl Into<String>,
        settings: &ConnectorSettings,
    ) -> Self {
        Self::new(base_url, exchange_name)
            .with_timeout(settings.rest_timeout())
            .with_max_retries(settings.rest_max_retries)
            .with_retry_base_ms(settings.rest_retry_base_ms)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_base_ms(mut self, retry_base_ms: u64) -> Self {
        self.retry_base_ms = retry_base_ms;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    limiter: Option<Arc<RateLimiter>>,
    clock: Arc<dyn Clock>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
            limiter: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let client = Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| ExchangeError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
            limiter: self.limiter,
            clock: self.clock,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    limiter: Option<Arc<RateLimiter>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .field("rate_limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl ReqwestRest {
    pub fn exchange_name(&self) -> &str {
        &self.config.exchange_name
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    fn create_query_string(params: &[(&str, &str)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn classify_transport_error(error: reqwest::Error) -> ExchangeError {
        if error.is_timeout() {
            ExchangeError::Timeout(error.to_string())
        } else if error.is_connect() || error.is_request() {
            ExchangeError::NetworkError(error.to_string())
        } else {
            ExchangeError::HttpError(error)
        }
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", text);

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| ExchangeError::malformed("response body", e));
        }

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExchangeError::AuthError(text),
            StatusCode::TOO_MANY_REQUESTS => ExchangeError::RateLimitExceeded(text),
            s if s.is_server_error() => ExchangeError::ServerError {
                status: s.as_u16(),
                message: text,
            },
            s => ExchangeError::ApiError {
                code: i64::from(s.as_u16()),
                message: text,
            },
        })
    }

    #[instrument(skip(self, query_params, body), fields(exchange = %self.config.exchange_name, method = %endpoint.method, endpoint = %endpoint.path))]
    async fn send_once(
        &self,
        endpoint: &Endpoint,
        query_params: &[(&str, &str)],
        body: &[u8],
    ) -> Result<Value, ExchangeError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(endpoint.limit_id).await?;
        }

        let query_string = Self::create_query_string(query_params);
        let url = if query_string.is_empty() {
            format!("{}{}", self.config.base_url, endpoint.path)
        } else {
            format!("{}{}?{}", self.config.base_url, endpoint.path, query_string)
        };

        let mut request = self.client.request(endpoint.method.clone(), &url);
        let mut payload = body.to_vec();

        if endpoint.auth {
            let signer = self.signer.as_ref().ok_or_else(|| {
                ExchangeError::AuthError(format!(
                    "{} requires credentials but no signer is configured",
                    endpoint.path
                ))
            })?;
            let timestamp = u64::try_from(self.clock.now_ms()).unwrap_or_default();
            let signed = signer.sign_request(
                endpoint.method.as_str(),
                &endpoint.path,
                &query_string,
                &payload,
                timestamp,
            )?;

            for (key, value) in &signed.headers {
                request = request.header(key.as_str(), value.as_str());
            }
            if !signed.query.is_empty() {
                request = request.query(&signed.query);
            }
            if let Some(replaced) = signed.body {
                payload = replaced;
            }
        }

        if !payload.is_empty() {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(payload);
        }

        let response = request
            .send()
            .await
            .map_err(Self::classify_transport_error)?;

        self.handle_response(response).await
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        query_params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ExchangeError> {
        let body_bytes = match body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };

        if !endpoint.is_retryable() || self.config.max_retries == 0 {
            return self.send_once(endpoint, query_params, &body_bytes).await;
        }

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.retry_base_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::start(
            strategy,
            || self.send_once(endpoint, query_params, &body_bytes),
            |error: &ExchangeError| {
                let retry = error.is_transient();
                if retry {
                    warn!(
                        exchange = %self.config.exchange_name,
                        endpoint = %endpoint.path,
                        error = %error,
                        "transient REST failure, retrying"
                    );
                }
                retry
            },
        )
        .await
    }

    async fn execute_json<T: DeserializeOwned + Send>(
        &self,
        endpoint: &Endpoint,
        query_params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, ExchangeError> {
        let value = self.execute(endpoint, query_params, body).await?;
        serde_json::from_value(value).map_err(|e| ExchangeError::malformed(&endpoint.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH: Endpoint = Endpoint::public(Method::GET, "/v1/market/depth/{symbol}", "depth");
    const PLACE: Endpoint = Endpoint::signed(Method::POST, "/trade/order/place", "place");
    const BALANCES: Endpoint = Endpoint::signed_read(Method::POST, "/spot/accountList", "bal");

    #[test]
    fn test_symbol_placeholder_resolution() {
        let resolved = DEPTH.with_symbol("BTCUSDT");
        assert_eq!(resolved.path, "/v1/market/depth/BTCUSDT");
        assert_eq!(resolved.limit_id, "depth");
        assert!(!resolved.auth);
    }

    #[test]
    fn test_retry_policy_follows_idempotency() {
        assert!(DEPTH.is_retryable());
        assert!(BALANCES.is_retryable());
        assert!(!PLACE.is_retryable());
    }

    #[test]
    fn test_query_string_preserves_order() {
        let query = ReqwestRest::create_query_string(&[("symbol", "BTCUSDT"), ("depth", "20")]);
        assert_eq!(query, "symbol=BTCUSDT&depth=20");
    }
}
