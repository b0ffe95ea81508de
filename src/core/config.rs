use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
    pub passphrase: Option<Secret<String>>,
    pub base_url: Option<String>,
    /// Public market data socket, when not the exchange default
    pub ws_url: Option<String>,
}

// Secrets never leave the process through serialization
impl Serialize for ExchangeConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ExchangeConfig", 5)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.serialize_field(
            "passphrase",
            &self.passphrase.as_ref().map(|_| "[REDACTED]"),
        )?;
        state.serialize_field("base_url", &self.base_url)?;
        state.serialize_field("ws_url", &self.ws_url)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ExchangeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ExchangeConfigHelper {
            api_key: String,
            secret_key: String,
            #[serde(default)]
            passphrase: Option<String>,
            #[serde(default)]
            base_url: Option<String>,
            #[serde(default)]
            ws_url: Option<String>,
        }

        let helper = ExchangeConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            api_key: Secret::new(helper.api_key),
            secret_key: Secret::new(helper.secret_key),
            passphrase: helper.passphrase.map(Secret::new),
            base_url: helper.base_url,
            ws_url: helper.ws_url,
        })
    }
}

impl ExchangeConfig {
    #[must_use]
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            passphrase: None,
            base_url: None,
            ws_url: None,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{EXCHANGE}_API_KEY` (e.g., `COINSTORE_API_KEY`)
    /// - `{EXCHANGE}_SECRET_KEY` (e.g., `COINSTORE_SECRET_KEY`)
    /// - `{EXCHANGE}_PASSPHRASE` (optional)
    /// - `{EXCHANGE}_BASE_URL` (optional)
    /// - `{EXCHANGE}_WS_URL` (optional)
    pub fn from_env(exchange_prefix: &str) -> Result<Self, ConfigError> {
        let prefix = exchange_prefix.to_uppercase();
        let api_key_var = format!("{prefix}_API_KEY");
        let secret_key_var = format!("{prefix}_SECRET_KEY");

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;
        let secret_key = env::var(&secret_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(secret_key_var))?;

        Ok(Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            passphrase: env::var(format!("{prefix}_PASSPHRASE")).ok().map(Secret::new),
            base_url: env::var(format!("{prefix}_BASE_URL")).ok(),
            ws_url: env::var(format!("{prefix}_WS_URL")).ok(),
        })
    }

    /// Load a .env file (if present) and then read the standard variables.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(exchange_prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(exchange_prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(
        exchange_prefix: &str,
        env_file_path: &str,
    ) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // no file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(exchange_prefix)
    }

    /// Configuration for public endpoints only (market data, prices)
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            api_key: Secret::new(String::new()),
            secret_key: Secret::new(String::new()),
            passphrase: None,
            base_url: None,
            ws_url: None,
        }
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.secret_key.expose_secret().is_empty()
    }

    #[must_use]
    pub fn passphrase(mut self, passphrase: String) -> Self {
        self.passphrase = Some(Secret::new(passphrase));
        self
    }

    #[must_use]
    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    #[must_use]
    pub fn ws_url(mut self, ws_url: String) -> Self {
        self.ws_url = Some(ws_url);
        self
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

/// Tunables shared by the REST client, the stream sources and the poll loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    pub rest_timeout_ms: u64,
    pub rest_max_retries: usize,
    pub rest_retry_base_ms: u64,
    pub ws_connect_timeout_ms: u64,
    /// No frame for this long means the socket is dead
    pub ws_idle_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub user_stream_cooldown_ms: u64,
    pub listen_key_keepalive_ms: u64,
    pub short_poll_interval_ms: u64,
    pub long_poll_interval_ms: u64,
    /// Push silence after which order state is treated as unknown
    pub stream_staleness_ms: u64,
    pub balance_refresh_interval_ms: u64,
    pub event_channel_capacity: usize,
    pub completed_order_history: usize,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            rest_timeout_ms: 10_000,
            rest_max_retries: 3,
            rest_retry_base_ms: 100,
            ws_connect_timeout_ms: 10_000,
            ws_idle_timeout_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            max_reconnect_attempts: 10,
            user_stream_cooldown_ms: 5_000,
            listen_key_keepalive_ms: 30 * 60 * 1_000,
            short_poll_interval_ms: 5_000,
            long_poll_interval_ms: 120_000,
            stream_staleness_ms: 60_000,
            balance_refresh_interval_ms: 30_000,
            event_channel_capacity: 1_024,
            completed_order_history: 1_000,
        }
    }
}

impl ConnectorSettings {
    pub fn rest_timeout(&self) -> Duration {
        Duration::from_millis(self.rest_timeout_ms)
    }

    pub fn ws_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_connect_timeout_ms)
    }

    pub fn ws_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_idle_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn user_stream_cooldown(&self) -> Duration {
        Duration::from_millis(self.user_stream_cooldown_ms)
    }

    pub fn listen_key_keepalive(&self) -> Duration {
        Duration::from_millis(self.listen_key_keepalive_ms)
    }

    pub fn short_poll_interval(&self) -> Duration {
        Duration::from_millis(self.short_poll_interval_ms)
    }

    pub fn balance_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.balance_refresh_interval_ms)
    }

    #[must_use]
    pub fn with_rest_timeout(mut self, timeout: Duration) -> Self {
        self.rest_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_rest_max_retries(mut self, retries: usize) -> Self {
        self.rest_max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_ws_idle_timeout(mut self, timeout: Duration) -> Self {
        self.ws_idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay_ms = base.as_millis() as u64;
        self.reconnect_max_delay_ms = max.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_user_stream_cooldown(mut self, cooldown: Duration) -> Self {
        self.user_stream_cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_poll_intervals(mut self, short: Duration, long: Duration) -> Self {
        self.short_poll_interval_ms = short.as_millis() as u64;
        self.long_poll_interval_ms = long.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_stream_staleness(mut self, staleness: Duration) -> Self {
        self.stream_staleness_ms = staleness.as_millis() as u64;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Exchange status '{status}' has no canonical order state")]
    UnmappedStatus { status: String },
}
