use crate::core::config::ConfigError;
use crate::core::errors::ExchangeError;
use crate::core::status::StatusTable;
use crate::core::tracker::InFlightOrder;
use crate::core::types::{
    parse_side, seconds_to_millis, Balance, ExchangeInfo, OrderState, TradeFee, TradeTick,
    TradeUpdate, TradingPair, TradingRule,
};
use crate::exchanges::p2b::types::{P2bBalances, P2bDeal, P2bMarket, P2bOpenOrder, P2bWsDeal};
use crate::exchanges::p2b::EXCHANGE_NAME;
use rust_decimal::Decimal;
use tracing::warn;

pub const OPEN: &str = "OPEN";
pub const PARTIALLY_FILLED: &str = "PARTIALLY_FILLED";
pub const FILLED: &str = "FILLED";
pub const CANCELED: &str = "CANCELED";

const ORDER_STATES: &[(&str, OrderState)] = &[
    ("PENDING", OrderState::PendingCreate),
    (OPEN, OrderState::Open),
    (PARTIALLY_FILLED, OrderState::PartiallyFilled),
    ("PENDING_CANCEL", OrderState::Open),
    (FILLED, OrderState::Filled),
    (CANCELED, OrderState::Canceled),
    ("REJECTED", OrderState::Failed),
    ("EXPIRED", OrderState::Failed),
    ("EXPIRED_IN_MATCH", OrderState::Failed),
];

const KNOWN_STATUSES: &[&str] = &[
    "PENDING",
    OPEN,
    PARTIALLY_FILLED,
    "PENDING_CANCEL",
    FILLED,
    CANCELED,
    "REJECTED",
    "EXPIRED",
    "EXPIRED_IN_MATCH",
];

pub fn status_table() -> Result<StatusTable, ConfigError> {
    StatusTable::validated(EXCHANGE_NAME, ORDER_STATES, KNOWN_STATUSES)
}

pub fn exchange_info(markets: Vec<P2bMarket>) -> ExchangeInfo {
    let mut info = ExchangeInfo::default();
    for market in markets {
        let pair = match TradingPair::new(&market.stock, &market.money) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(market = %market.name, error = %e, "skipping market");
                continue;
            }
        };
        info.rules.push(TradingRule {
            trading_pair: pair.clone(),
            min_order_size: market.limits.min_amount,
            min_notional: market.limits.min_total,
            min_price_increment: market.limits.tick_size,
            min_base_amount_increment: market.limits.step_size,
        });
        info.symbols.push((market.name, pair));
    }
    info
}

/// Order state derived from the deal history and the open order list.
///
/// P2B has no per-order status endpoint. An order whose deals cover its
/// amount is filled; one still listed as open is open or partially filled;
/// anything else has left the book without filling and was canceled.
pub fn derive_status(amount: Decimal, deals: &[P2bDeal], open: Option<&P2bOpenOrder>) -> &'static str {
    let executed: Decimal = deals.iter().map(|d| d.amount).sum();
    if executed >= amount && !executed.is_zero() {
        return FILLED;
    }
    match open {
        Some(order) if order.deal_stock.is_zero() && order.deal_money.is_zero() => OPEN,
        Some(_) => PARTIALLY_FILLED,
        None => CANCELED,
    }
}

/// One trade update per deal; fees are charged in the base asset.
pub fn trade_updates(deals: Vec<P2bDeal>, order: &InFlightOrder) -> Vec<TradeUpdate> {
    deals
        .into_iter()
        .filter(|deal| !deal.amount.is_zero())
        .map(|deal| TradeUpdate {
            trade_id: deal.id.0,
            client_order_id: Some(order.client_order_id.clone()),
            exchange_order_id: order.exchange_order_id.clone(),
            trading_pair: order.trading_pair.clone(),
            fill_price: deal.price,
            fill_base_amount: deal.amount,
            fill_quote_amount: deal.deal,
            fee: TradeFee {
                amount: deal.fee,
                asset: Some(order.trading_pair.base.clone()),
            },
            fill_timestamp: seconds_to_millis(deal.time),
        })
        .collect()
}

/// Assets with neither available nor frozen funds are left out.
pub fn balances(raw: P2bBalances) -> Vec<Balance> {
    let mut balances: Vec<Balance> = raw
        .into_iter()
        .filter(|(_, b)| !(b.available.is_zero() && b.freeze.is_zero()))
        .map(|(asset, b)| Balance {
            asset: asset.to_uppercase(),
            total: b.available + b.freeze,
            available: b.available,
        })
        .collect();
    balances.sort_by(|a, b| a.asset.cmp(&b.asset));
    balances
}

pub fn trade_tick(deal: P2bWsDeal, pair: &TradingPair) -> Result<TradeTick, ExchangeError> {
    Ok(TradeTick {
        trading_pair: pair.clone(),
        trade_id: deal.id.0,
        side: parse_side(&deal.side)?,
        price: deal.price,
        amount: deal.amount,
        timestamp: seconds_to_millis(deal.time),
    })
}
