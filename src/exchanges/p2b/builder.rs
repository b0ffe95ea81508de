use crate::core::adapter::{AdapterComponents, ExchangeAdapter};
use crate::core::config::{ConnectorSettings, ExchangeConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    Clock, RateLimiter, RestClientBuilder, RestClientConfig, Signer, SystemClock,
};
use crate::core::symbols::SymbolRegistry;
use crate::exchanges::p2b::codec::{DepthSequence, P2bMarketCodec};
use crate::exchanges::p2b::conversions::status_table;
use crate::exchanges::p2b::rest::{rate_limits, P2bRest};
use crate::exchanges::p2b::signer::P2bSigner;
use crate::exchanges::p2b::{profile, EXCHANGE_NAME, REST_URL};
use std::sync::Arc;

/// Create a P2B adapter; without credentials it serves market data only.
pub fn build_adapter(
    config: &ExchangeConfig,
    settings: ConnectorSettings,
) -> Result<ExchangeAdapter, ExchangeError> {
    build_adapter_with_clock(config, settings, Arc::new(SystemClock))
}

pub fn build_adapter_with_clock(
    config: &ExchangeConfig,
    settings: ConnectorSettings,
    clock: Arc<dyn Clock>,
) -> Result<ExchangeAdapter, ExchangeError> {
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| REST_URL.to_string());
    let symbols = SymbolRegistry::new();
    let sequence = Arc::new(DepthSequence::new());

    let signer: Option<Arc<dyn Signer>> = if config.has_credentials() {
        Some(Arc::new(P2bSigner::new(config.api_key(), config.secret_key())?))
    } else {
        None
    };

    let mut rest_builder = RestClientBuilder::new(RestClientConfig::from_settings(
        base_url.clone(),
        EXCHANGE_NAME,
        &settings,
    ))
    .with_rate_limiter(Arc::new(RateLimiter::new(rate_limits())))
    .with_clock(clock.clone());
    if let Some(signer) = &signer {
        rest_builder = rest_builder.with_signer(signer.clone());
    }
    let rest = P2bRest::new(
        rest_builder.build()?,
        clock.clone(),
        Arc::new(status_table()?),
        sequence.clone(),
    );

    Ok(ExchangeAdapter::new(AdapterComponents {
        profile: profile(base_url).with_public_ws_url(config.ws_url.as_deref()),
        symbols: symbols.clone(),
        rest: Arc::new(rest),
        market_codec: Arc::new(P2bMarketCodec::new(symbols, clock.clone(), sequence)),
        user_codec: None,
        signer,
        clock,
        settings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_polling_only_profile() {
        let config = ExchangeConfig::new("key".into(), "secret".into());
        let adapter = build_adapter(&config, ConnectorSettings::default()).unwrap();
        assert_eq!(adapter.name(), "p2b");
        assert!(adapter.profile().user_stream.is_none());
        assert!(adapter.profile().capabilities.incremental_diffs);
        assert_eq!(adapter.profile().client_order_id_prefix, "x-MG43PCSN");
        // no private stream to wait for
        assert!(adapter.status().user_stream_ready);
    }

    #[tokio::test]
    async fn test_blank_secret_rejected() {
        let config = ExchangeConfig::new("key".into(), " ".into());
        assert!(build_adapter(&config, ConnectorSettings::default()).is_err());
    }
}
