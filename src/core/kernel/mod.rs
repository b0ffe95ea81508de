/// Transport kernel shared by every exchange module.
///
/// Nothing in here knows about a particular exchange. Exchange modules plug
/// in through three seams:
///
/// - [`Signer`] turns a request into authentication headers (or a rewritten
///   body) given an injected timestamp
/// - [`Endpoint`] tables describe each REST call declaratively, including the
///   rate limit bucket it draws from
/// - [`WsCodec`] encodes subscriptions and routes inbound frames by channel key
///
/// # Example
/// ```rust,no_run
/// use cexbridge::core::kernel::*;
/// use cexbridge::exchanges::coinstore::{rest::rate_limits, signer::CoinstoreSigner};
/// use std::sync::Arc;
///
/// # fn build() -> Result<(), cexbridge::core::errors::ExchangeError> {
/// let signer = CoinstoreSigner::new("api_key", "secret_key")?;
/// let rest = RestClientBuilder::new(RestClientConfig::new(
///     "https://api.coinstore.com/api",
///     "coinstore",
/// ))
/// .with_signer(Arc::new(signer))
/// .with_rate_limiter(Arc::new(RateLimiter::new(rate_limits())))
/// .build()?;
/// # let _ = rest;
/// # Ok(())
/// # }
/// ```
pub mod clock;
pub mod codec;
pub mod rate_limit;
pub mod rest;
pub mod signer;
pub mod ws;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::WsCodec;
pub use rate_limit::{Admission, RateLimitRule, RateLimiter};
pub use rest::{Endpoint, ReqwestRest, RestClient, RestClientBuilder, RestClientConfig};
pub use signer::{SignatureResult, SignedRequest, Signer};
pub use ws::{ReconnectWs, TungsteniteWs, WsConfig, WsSession};
