use anyhow::Context;
use cexbridge::{
    ConnectorSettings, ExchangeFactory, ExchangeType, MarketEvent, OrderBookSnapshot, RateSource,
    TradingPair,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Streams public market data: `cexbridge <exchange> <BASE-QUOTE>...`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let exchange: ExchangeType = args
        .next()
        .unwrap_or_else(|| "coinstore".to_string())
        .parse()?;
    let mut pairs = args
        .map(|raw| raw.parse::<TradingPair>())
        .collect::<Result<Vec<_>, _>>()
        .context("trading pairs must look like BTC-USDT")?;
    if pairs.is_empty() {
        pairs.push(TradingPair::new("BTC", "USDT")?);
    }

    let adapter = ExchangeFactory::create_market_data_adapter(exchange, ConnectorSettings::default())?;
    adapter.refresh_metadata().await?;
    info!(%exchange, rules = adapter.get_trading_rules().len(), "metadata loaded");

    let rates = RateSource::new(adapter.clone(), Duration::from_secs(10));
    for (pair, price) in rates.prices(&pairs).await? {
        info!(%pair, %price, "last traded price");
    }

    let mut events = adapter.start(&pairs).await?;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(MarketEvent::Snapshot(book)) => log_top_of_book(&book),
                Some(MarketEvent::Diff(diff)) => {
                    if let Ok(book) = adapter.get_order_book(&diff.trading_pair).await {
                        log_top_of_book(&book);
                    }
                }
                Some(MarketEvent::Trade(trade)) => {
                    info!(pair = %trade.trading_pair, side = ?trade.side, price = %trade.price, amount = %trade.amount, "trade");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    adapter.stop();
    info!("stopped");
    Ok(())
}

fn log_top_of_book(book: &OrderBookSnapshot) {
    let bid = book.best_bid().map(|level| level.price);
    let ask = book.best_ask().map(|level| level.price);
    info!(pair = %book.trading_pair, ?bid, ?ask, "book");
}
