use crate::core::adapter::{AdapterComponents, ExchangeAdapter};
use crate::core::config::{ConnectorSettings, ExchangeConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    Clock, RateLimiter, RestClientBuilder, RestClientConfig, Signer, SystemClock,
};
use crate::core::symbols::SymbolRegistry;
use crate::core::user_stream::UserCodec;
use crate::exchanges::uzx::codec::{UzxMarketCodec, UzxUserCodec};
use crate::exchanges::uzx::conversions::status_table;
use crate::exchanges::uzx::rest::{rate_limits, UzxRest};
use crate::exchanges::uzx::signer::UzxSigner;
use crate::exchanges::uzx::{profile, EXCHANGE_NAME, REST_URL};
use std::sync::Arc;

/// Create a UZX adapter; without credentials it serves market data only.
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
    let status = Arc::new(status_table()?);
    let symbols = SymbolRegistry::new();

    let signer: Option<Arc<dyn Signer>> = if config.has_credentials() {
        Some(Arc::new(UzxSigner::new(config.api_key(), config.secret_key())?))
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
    let rest = UzxRest::new(rest_builder.build()?, clock.clone(), status.clone());

    let user_codec: Option<UserCodec> = signer.as_ref().map(|_| {
        Arc::new(UzxUserCodec::new(symbols.clone(), status, clock.clone())) as UserCodec
    });

    Ok(ExchangeAdapter::new(AdapterComponents {
        profile: profile(base_url).with_public_ws_url(config.ws_url.as_deref()),
        symbols: symbols.clone(),
        rest: Arc::new(rest),
        market_codec: Arc::new(UzxMarketCodec::new(symbols, clock.clone())),
        user_codec,
        signer,
        clock,
        settings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::SessionModel;

    #[tokio::test]
    async fn test_login_session_profile() {
        let config = ExchangeConfig::new("key".into(), "secret".into());
        let adapter = build_adapter(&config, ConnectorSettings::default()).unwrap();
        assert_eq!(adapter.name(), "uzx");
        assert!(!adapter.profile().capabilities.fills_endpoint);
        assert!(matches!(
            &adapter.profile().user_stream,
            Some(SessionModel::PersistentLogin { url }) if url == "wss://stream.uzx.com/notification/pri/ws"
        ));
    }

    #[tokio::test]
    async fn test_read_only_skips_private_stream() {
        let adapter = build_adapter(&ExchangeConfig::read_only(), ConnectorSettings::default()).unwrap();
        assert!(adapter.status().user_stream_ready);
        assert!(!adapter.status().trading_enabled);
    }
}
