//! UZX spot connector.
//!
//! The private socket authenticates with a signed login frame and then
//! subscribes per symbol. Depth pushes are full books. There is no per-order
//! trades endpoint: fills are derived from the cumulative executed amounts in
//! the order lists.

pub mod builder;
pub mod codec;
pub mod conversions;
pub mod rest;
pub mod signer;
pub mod types;

use crate::core::traits::{Capabilities, ExchangeProfile, SessionModel};

pub use builder::{build_adapter, build_adapter_with_clock};
pub use codec::{UzxMarketCodec, UzxUserCodec};
pub use rest::UzxRest;
pub use signer::UzxSigner;

pub const EXCHANGE_NAME: &str = "uzx";
pub const REST_URL: &str = "https://api-v2.uzx.com";
pub const WS_URL: &str = "wss://stream.uzx.com/notification/ws";
pub const PRIVATE_WS_URL: &str = "wss://stream.uzx.com/notification/pri/ws";
pub const MAX_CLIENT_ORDER_ID_LEN: usize = 32;

pub fn profile(rest_url: impl Into<String>) -> ExchangeProfile {
    ExchangeProfile {
        name: EXCHANGE_NAME,
        rest_url: rest_url.into(),
        public_ws_url: WS_URL.to_string(),
        user_stream: Some(SessionModel::PersistentLogin {
            url: PRIVATE_WS_URL.to_string(),
        }),
        capabilities: Capabilities {
            incremental_diffs: false,
            batch_cancel: false,
            fills_endpoint: false,
        },
        client_order_id_prefix: "",
        max_client_order_id_len: MAX_CLIENT_ORDER_ID_LEN,
    }
}
