use crate::core::adapter::ExchangeAdapter;
use crate::core::config::{ConfigError, ConnectorSettings, ExchangeConfig};
use crate::core::errors::ExchangeError;
use crate::exchanges::{coinstore, p2b, uzx};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Supported exchange types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeType {
    Coinstore,
    P2b,
    Uzx,
}

impl ExchangeType {
    pub const ALL: [Self; 3] = [Self::Coinstore, Self::P2b, Self::Uzx];

    /// Canonical lowercase name, as reported by the adapter
    pub fn name(self) -> &'static str {
        match self {
            Self::Coinstore => coinstore::EXCHANGE_NAME,
            Self::P2b => p2b::EXCHANGE_NAME,
            Self::Uzx => uzx::EXCHANGE_NAME,
        }
    }

    /// Prefix of the `{PREFIX}_API_KEY` style environment variables
    pub fn env_prefix(self) -> &'static str {
        match self {
            Self::Coinstore => "COINSTORE",
            Self::P2b => "P2B",
            Self::Uzx => "UZX",
        }
    }

    /// Whether the exchange pushes private updates over a socket
    pub fn has_user_stream(self) -> bool {
        !matches!(self, Self::P2b)
    }
}

impl std::fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coinstore => write!(f, "Coinstore"),
            Self::P2b => write!(f, "P2B"),
            Self::Uzx => write!(f, "UZX"),
        }
    }
}

impl FromStr for ExchangeType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|exchange| exchange.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::InvalidConfiguration(format!("unknown exchange '{s}'")))
    }
}

/// Factory for creating exchange adapters
pub struct ExchangeFactory;

impl ExchangeFactory {
    /// Create an adapter for the given exchange type.
    ///
    /// Without a config (or with one lacking credentials) the adapter serves
    /// market data only and order placement stays disabled.
    pub fn create_adapter(
        exchange_type: ExchangeType,
        config: Option<ExchangeConfig>,
        settings: ConnectorSettings,
    ) -> Result<Arc<ExchangeAdapter>, ExchangeError> {
        let config = config.unwrap_or_else(ExchangeConfig::read_only);
        info!(
            exchange = exchange_type.name(),
            authenticated = config.has_credentials(),
            "creating adapter"
        );
        let adapter = match exchange_type {
            ExchangeType::Coinstore => coinstore::build_adapter(&config, settings)?,
            ExchangeType::P2b => p2b::build_adapter(&config, settings)?,
            ExchangeType::Uzx => uzx::build_adapter(&config, settings)?,
        };
        Ok(Arc::new(adapter))
    }

    /// Market-data-only adapter, as used by price sources.
    pub fn create_market_data_adapter(
        exchange_type: ExchangeType,
        settings: ConnectorSettings,
    ) -> Result<Arc<ExchangeAdapter>, ExchangeError> {
        Self::create_adapter(exchange_type, None, settings)
    }

    /// Adapter with credentials read from `{PREFIX}_API_KEY` / `{PREFIX}_SECRET_KEY`.
    pub fn create_adapter_from_env(
        exchange_type: ExchangeType,
        settings: ConnectorSettings,
    ) -> Result<Arc<ExchangeAdapter>, ExchangeError> {
        let config = ExchangeConfig::from_env(exchange_type.env_prefix())?;
        Self::create_adapter(exchange_type, Some(config), settings)
    }

    pub fn get_available_exchanges() -> Vec<ExchangeType> {
        ExchangeType::ALL.to_vec()
    }
}
