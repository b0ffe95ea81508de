use crate::core::adapter::{AdapterComponents, ExchangeAdapter};
use crate::core::config::{ConnectorSettings, ExchangeConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    Clock, RateLimiter, RestClientBuilder, RestClientConfig, Signer, SystemClock,
};
use crate::core::symbols::SymbolRegistry;
use crate::core::user_stream::UserCodec;
use crate::exchanges::coinstore::codec::{CoinstoreMarketCodec, CoinstoreUserCodec};
use crate::exchanges::coinstore::conversions::status_table;
use crate::exchanges::coinstore::rest::{rate_limits, CoinstoreRest};
use crate::exchanges::coinstore::signer::CoinstoreSigner;
use crate::exchanges::coinstore::{profile, EXCHANGE_NAME, REST_URL};
use std::sync::Arc;

/// Create a Coinstore adapter; without credentials it serves market data only.
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
        Some(Arc::new(CoinstoreSigner::new(
            config.api_key(),
            config.secret_key(),
        )?))
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
    let rest = CoinstoreRest::new(rest_builder.build()?, clock.clone(), status.clone());

    let user_codec: Option<UserCodec> = signer.as_ref().map(|_| {
        Arc::new(CoinstoreUserCodec::new(symbols.clone(), status.clone())) as UserCodec
    });

    Ok(ExchangeAdapter::new(AdapterComponents {
        profile: profile(base_url).with_public_ws_url(config.ws_url.as_deref()),
        symbols: symbols.clone(),
        rest: Arc::new(rest),
        market_codec: Arc::new(CoinstoreMarketCodec::new(symbols, clock.clone())),
        user_codec,
        signer,
        clock,
        settings,
    }))
}
