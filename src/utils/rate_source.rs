use crate::core::adapter::ExchangeAdapter;
use crate::core::cache::TtlCache;
use crate::core::errors::ExchangeError;
use crate::core::types::TradingPair;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(10);

/// Last-traded-price source over a market-data-only adapter.
///
/// Prices are cached per pair; only pairs without a fresh entry go to the
/// exchange, in a single ticker request.
pub struct RateSource {
    adapter: Arc<ExchangeAdapter>,
    prices: TtlCache<TradingPair, Decimal>,
}

impl RateSource {
    pub fn new(adapter: Arc<ExchangeAdapter>, ttl: Duration) -> Self {
        Self {
            adapter,
            prices: TtlCache::new(ttl),
        }
    }

    pub fn exchange(&self) -> &'static str {
        self.adapter.name()
    }

    /// Last traded prices for `pairs`. Pairs the exchange does not list are
    /// absent from the result.
    #[instrument(skip(self, pairs), fields(exchange = self.adapter.name(), pairs = pairs.len()))]
    pub async fn prices(
        &self,
        pairs: &[TradingPair],
    ) -> Result<HashMap<TradingPair, Decimal>, ExchangeError> {
        let mut prices = HashMap::with_capacity(pairs.len());
        let mut missing = Vec::new();
        for pair in pairs {
            match self.prices.get(pair) {
                Some(price) => {
                    prices.insert(pair.clone(), price);
                }
                None => missing.push(pair.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(prices);
        }

        if !self.adapter.symbols().is_ready() {
            self.adapter.refresh_metadata().await?;
        }
        let fetched = self.adapter.get_last_traded_prices(&missing).await?;
        debug!(requested = missing.len(), received = fetched.len(), "fetched prices");
        for (pair, price) in fetched {
            self.prices.insert(pair.clone(), price);
            prices.insert(pair, price);
        }
        Ok(prices)
    }

    pub async fn price(&self, pair: &TradingPair) -> Result<Option<Decimal>, ExchangeError> {
        let mut prices = self.prices(std::slice::from_ref(pair)).await?;
        Ok(prices.remove(pair))
    }

    /// Units of `quote` per unit of `base`, from the direct market or the
    /// inverse of the reversed one.
    pub async fn conversion_rate(
        &self,
        base: &str,
        quote: &str,
    ) -> Result<Option<Decimal>, ExchangeError> {
        let direct = TradingPair::new(base, quote)
            .map_err(|e| ExchangeError::InvalidParameters(e.to_string()))?;
        if direct.base == direct.quote {
            return Ok(Some(Decimal::ONE));
        }
        let inverse = TradingPair::new(quote, base)
            .map_err(|e| ExchangeError::InvalidParameters(e.to_string()))?;

        let prices = self.prices(&[direct.clone(), inverse.clone()]).await?;
        Ok(cross_rate(
            prices.get(&direct).copied(),
            prices.get(&inverse).copied(),
        ))
    }

    /// Forget every cached price
    pub fn invalidate(&self) {
        self.prices.clear();
    }
}

fn cross_rate(direct: Option<Decimal>, inverse: Option<Decimal>) -> Option<Decimal> {
    direct
        .filter(|price| !price.is_zero())
        .or_else(|| inverse.and_then(|price| Decimal::ONE.checked_div(price)))
}
