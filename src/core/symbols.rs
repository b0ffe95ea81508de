use crate::core::errors::ExchangeError;
use crate::core::types::TradingPair;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Bidirectional canonical pair ⇄ exchange symbol map. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    to_exchange: HashMap<TradingPair, String>,
    to_pair: HashMap<String, TradingPair>,
}

impl SymbolMap {
    /// Later duplicates of a symbol or pair are skipped.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, TradingPair)>) -> Self {
        let mut map = Self::default();
        for (symbol, pair) in entries {
            if map.to_pair.contains_key(&symbol) || map.to_exchange.contains_key(&pair) {
                warn!(%symbol, %pair, "duplicate symbol mapping ignored");
                continue;
            }
            map.to_exchange.insert(pair.clone(), symbol.clone());
            map.to_pair.insert(symbol, pair);
        }
        map
    }

    pub fn exchange_symbol(&self, pair: &TradingPair) -> Option<&str> {
        self.to_exchange.get(pair).map(String::as_str)
    }

    pub fn trading_pair(&self, symbol: &str) -> Option<&TradingPair> {
        self.to_pair.get(symbol)
    }

    pub fn trading_pairs(&self) -> impl Iterator<Item = &TradingPair> {
        self.to_exchange.keys()
    }

    pub fn len(&self) -> usize {
        self.to_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_pair.is_empty()
    }
}

/// Shared handle to the current [`SymbolMap`].
///
/// Readers always see a complete map; refreshes swap in a new one under a
/// short write lock.
#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    current: Arc<RwLock<Arc<SymbolMap>>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, map: SymbolMap) {
        *self.current.write() = Arc::new(map);
    }

    pub fn snapshot(&self) -> Arc<SymbolMap> {
        Arc::clone(&self.current.read())
    }

    pub fn is_ready(&self) -> bool {
        !self.current.read().is_empty()
    }

    pub fn exchange_symbol(&self, pair: &TradingPair) -> Result<String, ExchangeError> {
        self.current
            .read()
            .exchange_symbol(pair)
            .map(str::to_string)
            .ok_or_else(|| ExchangeError::UnknownTradingPair(pair.to_string()))
    }

    pub fn trading_pair(&self, symbol: &str) -> Result<TradingPair, ExchangeError> {
        self.current
            .read()
            .trading_pair(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::UnknownTradingPair(symbol.to_string()))
    }
}
