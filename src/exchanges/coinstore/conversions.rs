use crate::core::config::ConfigError;
use crate::core::errors::ExchangeError;
use crate::core::status::StatusTable;
use crate::core::symbols::SymbolRegistry;
use crate::core::types::{
    increment_from_places, parse_side, seconds_to_millis, Balance, ExchangeInfo, OrderState,
    OrderUpdate, TradeFee, TradeTick, TradeUpdate, TradingPair, TradingRule, UserEvent,
};
use crate::exchanges::coinstore::types::{
    CoinstoreAccountEntry, CoinstoreAccountPosition, CoinstoreExecutionReport, CoinstoreMatch,
    CoinstoreSymbol, CoinstoreTrade,
};
use crate::exchanges::coinstore::EXCHANGE_NAME;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::warn;

const ORDER_STATES: &[(&str, OrderState)] = &[
    ("SUBMITTING", OrderState::PendingCreate),
    ("SUBMITTED", OrderState::Open),
    ("NEW", OrderState::Open),
    ("PARTIAL_FILLED", OrderState::PartiallyFilled),
    ("PARTIALLY_FILLED", OrderState::PartiallyFilled),
    ("CANCELING", OrderState::Open),
    ("CANCELED", OrderState::Canceled),
    ("FILLED", OrderState::Filled),
    ("REJECTED", OrderState::Failed),
    ("EXPIRED", OrderState::Failed),
    ("STOPPED", OrderState::Failed),
];

/// Statuses documented for the REST order endpoints and the private stream.
const KNOWN_STATUSES: &[&str] = &[
    "SUBMITTING",
    "SUBMITTED",
    "NEW",
    "PARTIAL_FILLED",
    "PARTIALLY_FILLED",
    "CANCELING",
    "CANCELED",
    "FILLED",
    "REJECTED",
    "EXPIRED",
    "STOPPED",
];

const BALANCE_AVAILABLE: i64 = 1;
const BALANCE_FROZEN: i64 = 4;

pub fn status_table() -> Result<StatusTable, ConfigError> {
    StatusTable::validated(EXCHANGE_NAME, ORDER_STATES, KNOWN_STATUSES)
}

/// Symbol codes are mixed case on the wire (`trxUSDT`); the map keys are upper case.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.to_uppercase()
}

/// Symbol map entries and trading rules for every pair open for trading.
pub fn exchange_info(symbols: Vec<CoinstoreSymbol>) -> ExchangeInfo {
    let mut info = ExchangeInfo::default();
    for entry in symbols.into_iter().filter(|s| s.open_trade) {
        let pair = match TradingPair::new(&entry.trade_currency_code, &entry.quote_currency_code) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(symbol = %entry.symbol_code, error = %e, "skipping symbol");
                continue;
            }
        };
        let base_increment = increment_from_places(entry.lot_sz);
        info.rules.push(TradingRule {
            trading_pair: pair.clone(),
            min_order_size: entry.min_lmt_sz,
            min_notional: entry.min_mkt_va,
            min_price_increment: increment_from_places(entry.tick_sz),
            min_base_amount_increment: base_increment,
        });
        info.symbols.push((normalize_symbol(&entry.symbol_code), pair));
    }
    info
}

pub fn trade_tick(trade: CoinstoreTrade, symbols: &SymbolRegistry) -> Result<TradeTick, ExchangeError> {
    let timestamp = match (trade.ts, trade.time) {
        (Some(ms), _) => ms,
        (None, Some(seconds)) => seconds_to_millis(seconds as f64),
        (None, None) => return Err(ExchangeError::malformed("trade", "missing timestamp")),
    };
    Ok(TradeTick {
        trading_pair: symbols.trading_pair(&normalize_symbol(&trade.symbol))?,
        trade_id: trade.trade_id.0,
        side: parse_side(&trade.taker_side)?,
        price: trade.price,
        amount: trade.volume,
        timestamp,
    })
}

/// Account matches for one order; the fee is charged in the base asset.
pub fn trade_updates(
    matches: Vec<CoinstoreMatch>,
    exchange_order_id: &str,
    client_order_id: &str,
    pair: &TradingPair,
) -> Vec<TradeUpdate> {
    matches
        .into_iter()
        .filter(|m| m.order_id.0 == exchange_order_id && !m.exec_qty.is_zero())
        .map(|m| TradeUpdate {
            trade_id: m.trade_id.0,
            client_order_id: Some(client_order_id.to_string()),
            exchange_order_id: Some(m.order_id.0),
            trading_pair: pair.clone(),
            fill_price: m.exec_amt / m.exec_qty,
            fill_base_amount: m.exec_qty,
            fill_quote_amount: m.exec_amt,
            fee: TradeFee {
                amount: m.fee,
                asset: Some(pair.base.clone()),
            },
            fill_timestamp: m.match_time,
        })
        .collect()
}

/// Available (type 1) and frozen (type 4) rows folded into one balance per asset.
pub fn balances(entries: Vec<CoinstoreAccountEntry>) -> Vec<Balance> {
    let mut folded: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();
    for entry in entries {
        let slot = folded.entry(entry.currency.to_uppercase()).or_default();
        match entry.kind {
            BALANCE_AVAILABLE => slot.0 += entry.balance,
            BALANCE_FROZEN => slot.1 += entry.balance,
            _ => {}
        }
    }
    folded
        .into_iter()
        .map(|(asset, (available, frozen))| Balance {
            asset,
            total: available + frozen,
            available,
        })
        .collect()
}

/// A TRADE execution yields the fill followed by the order state it left behind.
pub fn execution_report(
    report: CoinstoreExecutionReport,
    symbols: &SymbolRegistry,
    status: &StatusTable,
) -> Result<Vec<UserEvent>, ExchangeError> {
    let pair = symbols.trading_pair(&normalize_symbol(&report.symbol))?;
    let client_order_id = match report.execution_type.as_str() {
        "CANCELED" => report.orig_client_order_id.or(report.client_order_id),
        _ => report.client_order_id,
    };
    let client_order_id = client_order_id.filter(|id| !id.is_empty());
    let new_state = status.lookup(&report.order_status)?;

    let mut events = Vec::with_capacity(2);
    if report.execution_type == "TRADE" {
        let (Some(trade_id), Some(amount), Some(price)) =
            (report.trade_id, report.last_quantity, report.last_price)
        else {
            return Err(ExchangeError::malformed("executionReport", "trade without fill fields"));
        };
        events.push(UserEvent::Trade(TradeUpdate {
            trade_id: trade_id.0,
            client_order_id: client_order_id.clone(),
            exchange_order_id: Some(report.order_id.0.clone()),
            trading_pair: pair.clone(),
            fill_price: price,
            fill_base_amount: amount,
            fill_quote_amount: amount * price,
            fee: TradeFee {
                amount: report.commission.unwrap_or_default(),
                asset: report.commission_asset,
            },
            fill_timestamp: report.trade_time.unwrap_or(report.event_time),
        }));
    }
    events.push(UserEvent::Order(OrderUpdate {
        client_order_id,
        exchange_order_id: Some(report.order_id.0),
        trading_pair: pair,
        new_state,
        update_timestamp: report.event_time,
    }));
    Ok(events)
}

pub fn account_position(position: CoinstoreAccountPosition) -> Vec<UserEvent> {
    position
        .balances
        .into_iter()
        .map(|entry| {
            UserEvent::Balance(Balance {
                asset: entry.asset.to_uppercase(),
                total: entry.free + entry.locked,
                available: entry.free,
            })
        })
        .collect()
}
