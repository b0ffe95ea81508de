//! Exchange connectors behind one canonical trading interface.
//!
//! Each exchange module supplies a signer, a REST strategy and WebSocket
//! codecs; [`ExchangeAdapter`] wires them into market data, a private user
//! stream and order lifecycle tracking.

pub mod core;
pub mod exchanges;
pub mod utils;

pub use core::adapter::{ConnectorStatus, ExchangeAdapter};
pub use core::config::{ConfigError, ConnectorSettings, ExchangeConfig};
pub use core::{errors::ExchangeError, types::*};
pub use utils::exchange_factory::{ExchangeFactory, ExchangeType};
pub use utils::rate_source::RateSource;
