//! Coinstore spot connector.
//!
//! Private updates arrive on a listen-key socket; public depth pushes are
//! full books, so the local book is replaced on every push.

pub mod builder;
pub mod codec;
pub mod conversions;
pub mod rest;
pub mod signer;
pub mod types;

use crate::core::traits::{Capabilities, ExchangeProfile, SessionModel};

pub use builder::{build_adapter, build_adapter_with_clock};
pub use codec::{CoinstoreMarketCodec, CoinstoreUserCodec};
pub use rest::CoinstoreRest;
pub use signer::CoinstoreSigner;

pub const EXCHANGE_NAME: &str = "coinstore";
pub const REST_URL: &str = "https://api.coinstore.com/api";
pub const WS_URL: &str = "wss://ws.coinstore.com/s/ws";
pub const MAX_CLIENT_ORDER_ID_LEN: usize = 32;

pub fn profile(rest_url: impl Into<String>) -> ExchangeProfile {
    ExchangeProfile {
        name: EXCHANGE_NAME,
        rest_url: rest_url.into(),
        public_ws_url: WS_URL.to_string(),
        user_stream: Some(SessionModel::ListenKey {
            url_template: format!("{WS_URL}?listenKey={{listen_key}}"),
        }),
        capabilities: Capabilities {
            incremental_diffs: false,
            batch_cancel: true,
            fills_endpoint: true,
        },
        client_order_id_prefix: "",
        max_client_order_id_len: MAX_CLIENT_ORDER_ID_LEN,
    }
}
