use crate::core::config::ConfigError;
use crate::core::errors::ExchangeError;
use crate::core::status::StatusTable;
use crate::core::types::{
    decimal_from_value, increment_from_places, parse_levels, parse_side, Balance, CumulativeFill,
    ExchangeInfo, OrderBookLevel, OrderState, TradeFee, TradeTick, TradingPair, TradingRule,
};
use crate::exchanges::uzx::types::{UzxBalance, UzxFill, UzxOrder, UzxProduct};
use crate::exchanges::uzx::EXCHANGE_NAME;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

pub const PENDING: &str = "0";
pub const PARTIALLY_FILLED: &str = "1";
pub const PARTIALLY_CANCELED: &str = "2";
pub const CANCELED: &str = "3";
pub const FULLY_FILLED: &str = "4";

const LISTED: i64 = 1;

/// A partially canceled order is finished; its fills are reconciled from the
/// cumulative totals.
const ORDER_STATES: &[(&str, OrderState)] = &[
    (PENDING, OrderState::Open),
    (PARTIALLY_FILLED, OrderState::PartiallyFilled),
    (PARTIALLY_CANCELED, OrderState::Canceled),
    (CANCELED, OrderState::Canceled),
    (FULLY_FILLED, OrderState::Filled),
];

const KNOWN_STATUSES: &[&str] = &[
    PENDING,
    PARTIALLY_FILLED,
    PARTIALLY_CANCELED,
    CANCELED,
    FULLY_FILLED,
];

pub fn status_table() -> Result<StatusTable, ConfigError> {
    StatusTable::validated(EXCHANGE_NAME, ORDER_STATES, KNOWN_STATUSES)
}

pub fn order_state(table: &StatusTable, code: i64) -> Result<OrderState, ExchangeError> {
    table.lookup(&code.to_string())
}

/// Listed products only; increments come from the precision fields and the
/// smallest order is one base increment.
pub fn exchange_info(products: Vec<UzxProduct>) -> ExchangeInfo {
    let mut info = ExchangeInfo::default();
    for product in products.into_iter().filter(|p| p.status == LISTED) {
        let pair = match TradingPair::new(&product.base_coin_name, &product.quote_coin_name) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(product = %product.product_name, error = %e, "skipping product");
                continue;
            }
        };
        let base_increment = increment_from_places(product.coin_precision);
        info.rules.push(TradingRule {
            trading_pair: pair.clone(),
            min_order_size: base_increment,
            min_notional: Decimal::ZERO,
            min_price_increment: increment_from_places(product.price_precision),
            min_base_amount_increment: base_increment,
        });
        info.symbols.push((product.product_name, pair));
    }
    info
}

/// `BTC/USDT`, the symbol form the trade endpoints expect.
pub fn order_symbol(pair: &TradingPair) -> String {
    format!("{}/{}", pair.base, pair.quote)
}

/// Depth levels as `{"price", "amount"}` objects or `[price, amount]` rows.
pub fn levels(raw: &[Value], side: &str) -> Result<Vec<OrderBookLevel>, ExchangeError> {
    raw.iter()
        .map(|level| match level {
            Value::Object(fields) => {
                let field = |name: &str| {
                    fields
                        .get(name)
                        .ok_or_else(|| ExchangeError::malformed(side, format!("level without {name}")))
                        .and_then(|value| decimal_from_value(value, side))
                };
                Ok(OrderBookLevel::new(field("price")?, field("amount")?))
            }
            Value::Array(row) => parse_levels(std::slice::from_ref(row), side)
                .map(|mut parsed| parsed.remove(0)),
            other => Err(ExchangeError::malformed(side, format!("unexpected level {other}"))),
        })
        .collect()
}

/// Executed totals of a listed order. UZX reports no per-order fee.
pub fn cumulative_fill(order: &UzxOrder, pair: &TradingPair, now: i64) -> CumulativeFill {
    CumulativeFill {
        filled_base: order.traded_amount,
        filled_quote: order.turnover,
        fee: TradeFee {
            amount: Decimal::ZERO,
            asset: Some(pair.quote.clone()),
        },
        timestamp: order.last_change().unwrap_or(now),
    }
}

pub fn balance(raw: UzxBalance) -> Balance {
    Balance {
        asset: raw.coin.unit.to_uppercase(),
        total: raw.total_balance,
        available: raw.balance,
    }
}

/// REST balances; assets with an empty total are left out.
pub fn balances(raw: Vec<UzxBalance>) -> Vec<Balance> {
    let mut balances: Vec<Balance> = raw
        .into_iter()
        .filter(|b| !b.total_balance.is_zero())
        .map(balance)
        .collect();
    balances.sort_by(|a, b| a.asset.cmp(&b.asset));
    balances
}

pub fn trade_tick(fill: UzxFill, pair: &TradingPair) -> Result<TradeTick, ExchangeError> {
    Ok(TradeTick {
        trading_pair: pair.clone(),
        trade_id: fill.id.0,
        side: parse_side(&fill.direction)?,
        price: fill.price,
        amount: fill.vol,
        timestamp: fill.ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::OrderSide;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_numeric_status_codes() {
        let table = status_table().unwrap();
        assert_eq!(order_state(&table, 0).unwrap(), OrderState::Open);
        assert_eq!(order_state(&table, 1).unwrap(), OrderState::PartiallyFilled);
        assert_eq!(order_state(&table, 2).unwrap(), OrderState::Canceled);
        assert_eq!(order_state(&table, 4).unwrap(), OrderState::Filled);
        assert!(order_state(&table, 7).is_err());
    }

    #[test]
    fn test_exchange_info_keeps_listed_products() {
        let products: Vec<UzxProduct> = serde_json::from_value(json!([
            {"product_id": 204165, "product_name": "BTCUSDT", "base_coin_name": "BTC",
             "quote_coin_name": "USDT", "coin_precision": 3, "price_precision": 1, "status": 1},
            {"product_name": "OLDUSDT", "base_coin_name": "OLD", "quote_coin_name": "USDT",
             "coin_precision": 2, "price_precision": 2, "status": 0}
        ]))
        .unwrap();
        let info = exchange_info(products);
        assert_eq!(info.symbols.len(), 1);
        assert_eq!(info.symbols[0].0, "BTCUSDT");
        let rule = &info.rules[0];
        assert_eq!(rule.min_price_increment, dec!(0.1));
        assert_eq!(rule.min_base_amount_increment, dec!(0.001));
        assert_eq!(rule.min_order_size, dec!(0.001));
        assert_eq!(rule.min_notional, Decimal::ZERO);
    }

    #[test]
    fn test_levels_accept_objects_and_rows() {
        let parsed = levels(
            &[json!({"price": 85832.42, "amount": 0.20450935}), json!(["85833", "1"])],
            "asks",
        )
        .unwrap();
        assert_eq!(parsed[0].price, dec!(85832.42));
        assert_eq!(parsed[0].amount, dec!(0.20450935));
        assert_eq!(parsed[1].price, dec!(85833));
        assert!(levels(&[json!({"price": 1})], "asks").is_err());
        assert!(levels(&[json!("1")], "asks").is_err());
    }

    #[test]
    fn test_cumulative_fill_from_listed_order() {
        let order: UzxOrder = serde_json::from_value(json!({
            "orderId": "77", "status": 4, "tradedAmount": "0.5", "turnover": "50",
            "price": "100", "time": 1000, "completedTime": 2000
        }))
        .unwrap();
        let pair = TradingPair::new("BTC", "USDT").unwrap();
        let fill = cumulative_fill(&order, &pair, 9_999);
        assert_eq!(fill.filled_base, dec!(0.5));
        assert_eq!(fill.filled_quote, dec!(50));
        assert_eq!(fill.timestamp, 2000);
        assert!(fill.fee.amount.is_zero());
    }

    #[test]
    fn test_balances_skip_empty_totals() {
        let raw: Vec<UzxBalance> = serde_json::from_value(json!([
            {"coin": {"unit": "usdt"}, "balance": "10", "totalBalance": "15"},
            {"coin": {"unit": "BTC"}, "balance": 0, "totalBalance": 0}
        ]))
        .unwrap();
        let balances = balances(raw);
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].asset, "USDT");
        assert_eq!(balances[0].total, dec!(15));
        assert_eq!(balances[0].available, dec!(10));
    }

    #[test]
    fn test_fill_direction() {
        let fill: UzxFill = serde_json::from_value(json!({
            "vol": "4536", "ts": 1743670720867i64, "id": 7442380000u64,
            "price": "2.0503", "direction": "sell"
        }))
        .unwrap();
        let tick = trade_tick(fill, &TradingPair::new("XRP", "USDT").unwrap()).unwrap();
        assert_eq!(tick.side, OrderSide::Sell);
        assert_eq!(tick.trade_id, "7442380000");
        assert_eq!(tick.amount, dec!(4536));
    }

    #[test]
    fn test_order_symbol_uses_slash() {
        assert_eq!(order_symbol(&TradingPair::new("btc", "usdt").unwrap()), "BTC/USDT");
    }
}
