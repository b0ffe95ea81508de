//! P2B spot connector.
//!
//! There is no private stream: order state comes from REST polling of deal
//! history and open orders. Depth pushes are diffs after an initial clean
//! book, sequenced locally.

pub mod builder;
pub mod codec;
pub mod conversions;
pub mod rest;
pub mod signer;
pub mod types;

use crate::core::traits::{Capabilities, ExchangeProfile};

pub use builder::{build_adapter, build_adapter_with_clock};
pub use codec::{DepthSequence, P2bMarketCodec};
pub use rest::P2bRest;
pub use signer::P2bSigner;

pub const EXCHANGE_NAME: &str = "p2b";
pub const REST_URL: &str = "https://api.p2pb2b.com";
pub const WS_URL: &str = "wss://apiws.p2pb2b.com";
pub const CLIENT_ORDER_ID_PREFIX: &str = "x-MG43PCSN";
pub const MAX_CLIENT_ORDER_ID_LEN: usize = 32;

pub fn profile(rest_url: impl Into<String>) -> ExchangeProfile {
    ExchangeProfile {
        name: EXCHANGE_NAME,
        rest_url: rest_url.into(),
        public_ws_url: WS_URL.to_string(),
        user_stream: None,
        capabilities: Capabilities {
            incremental_diffs: true,
            batch_cancel: false,
            fills_endpoint: true,
        },
        client_order_id_prefix: CLIENT_ORDER_ID_PREFIX,
        max_client_order_id_len: MAX_CLIENT_ORDER_ID_LEN,
    }
}
