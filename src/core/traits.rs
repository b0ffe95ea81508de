use crate::core::{
    errors::ExchangeError,
    tracker::InFlightOrder,
    types::{
        Balance, CancellationResult, ExchangeInfo, FillReport, OrderBookSnapshot, OrderUpdate,
        PlaceOrderAck, TradingPair,
    },
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Protocol features that change how the shared machinery behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Depth channel carries sequenced diffs; when `false` every push is a
    /// full snapshot and replaces the book.
    pub incremental_diffs: bool,
    pub batch_cancel: bool,
    /// A per-order trades endpoint exists; otherwise fills are derived from
    /// cumulative executed amounts.
    pub fills_endpoint: bool,
}

/// How the private stream authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionModel {
    /// REST-issued token embedded in the socket URL (`{listen_key}` placeholder)
    ListenKey { url_template: String },
    /// The socket sends a signed login frame after connecting
    PersistentLogin { url: String },
}

/// Static description of one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeProfile {
    pub name: &'static str,
    pub rest_url: String,
    pub public_ws_url: String,
    /// `None` means order state is reconciled by REST polling only
    pub user_stream: Option<SessionModel>,
    pub capabilities: Capabilities,
    pub client_order_id_prefix: &'static str,
    pub max_client_order_id_len: usize,
}

impl ExchangeProfile {
    /// Swap in another public socket, e.g. a local relay.
    #[must_use]
    pub fn with_public_ws_url(mut self, url: Option<&str>) -> Self {
        if let Some(url) = url {
            self.public_ws_url = url.to_string();
        }
        self
    }
}

/// Per-exchange REST encoders/decoders.
///
/// Implementations only translate between canonical types and the wire;
/// signing, rate limiting, retries and timeouts live in the shared REST client.
#[async_trait]
pub trait ExchangeRest: Send + Sync {
    /// Symbol map entries and trading rules
    async fn exchange_info(&self) -> Result<ExchangeInfo, ExchangeError>;

    async fn order_book_snapshot(
        &self,
        pair: &TradingPair,
        symbol: &str,
    ) -> Result<OrderBookSnapshot, ExchangeError>;

    /// Last traded price keyed by exchange symbol
    async fn last_traded_prices(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;

    async fn place_order(
        &self,
        order: &InFlightOrder,
        symbol: &str,
    ) -> Result<PlaceOrderAck, ExchangeError>;

    /// `Ok(false)` when the exchange answered but refused the cancel.
    /// Unknown orders surface as [`ExchangeError::OrderNotFound`].
    async fn cancel_order(&self, order: &InFlightOrder, symbol: &str) -> Result<bool, ExchangeError>;

    async fn cancel_orders(
        &self,
        _symbol: &str,
        _orders: &[InFlightOrder],
    ) -> Result<Vec<CancellationResult>, ExchangeError> {
        Err(ExchangeError::InvalidParameters(
            "batch cancel is not supported".to_string(),
        ))
    }

    async fn order_status(
        &self,
        order: &InFlightOrder,
        symbol: &str,
    ) -> Result<OrderUpdate, ExchangeError>;

    async fn order_fills(
        &self,
        order: &InFlightOrder,
        symbol: &str,
    ) -> Result<FillReport, ExchangeError>;

    async fn balances(&self) -> Result<Vec<Balance>, ExchangeError>;

    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        Err(ExchangeError::InvalidParameters(
            "listen keys are not supported".to_string(),
        ))
    }

    async fn keepalive_listen_key(&self, _listen_key: &str) -> Result<(), ExchangeError> {
        Err(ExchangeError::InvalidParameters(
            "listen keys are not supported".to_string(),
        ))
    }

    async fn close_listen_key(&self, _listen_key: &str) -> Result<(), ExchangeError> {
        Ok(())
    }
}
