use crate::core::errors::ExchangeError;
use crate::core::types::{OrderBookDiff, OrderBookLevel, OrderBookSnapshot, TradingPair};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    Applied,
    /// Entirely covered by the current state
    Stale,
}

/// Local replica of one pair's book.
#[derive(Debug, Clone)]
pub struct OrderBook {
    trading_pair: TradingPair,
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: u64,
    timestamp: i64,
    valid: bool,
}

impl OrderBook {
    pub fn new(trading_pair: TradingPair) -> Self {
        Self {
            trading_pair,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            timestamp: 0,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Snapshots are authoritative and replace the whole book.
    pub fn apply_snapshot(&mut self, snapshot: &OrderBookSnapshot) {
        self.bids = snapshot
            .bids
            .iter()
            .filter(|l| !l.amount.is_zero())
            .map(|l| (Reverse(l.price), l.amount))
            .collect();
        self.asks = snapshot
            .asks
            .iter()
            .filter(|l| !l.amount.is_zero())
            .map(|l| (l.price, l.amount))
            .collect();
        self.last_update_id = snapshot.update_id;
        self.timestamp = snapshot.timestamp;
        self.valid = true;
    }

    /// Apply a diff contiguous with the last applied id.
    pub fn apply_diff(&mut self, diff: &OrderBookDiff) -> Result<DiffOutcome, ExchangeError> {
        if diff.final_update_id <= self.last_update_id {
            return Ok(DiffOutcome::Stale);
        }

        let expected = self.last_update_id + 1;
        if !self.valid || diff.first_update_id > expected {
            self.valid = false;
            return Err(ExchangeError::SequenceGap {
                trading_pair: self.trading_pair.to_string(),
                expected,
                received: diff.first_update_id,
            });
        }

        for level in &diff.bids {
            if level.amount.is_zero() {
                self.bids.remove(&Reverse(level.price));
            } else {
                self.bids.insert(Reverse(level.price), level.amount);
            }
        }
        for level in &diff.asks {
            if level.amount.is_zero() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.amount);
            }
        }
        self.last_update_id = diff.final_update_id;
        self.timestamp = diff.timestamp;
        Ok(DiffOutcome::Applied)
    }

    pub fn best_bid(&self) -> Option<OrderBookLevel> {
        self.bids
            .iter()
            .next()
            .map(|(Reverse(price), amount)| OrderBookLevel::new(*price, *amount))
    }

    pub fn best_ask(&self) -> Option<OrderBookLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, amount)| OrderBookLevel::new(*price, *amount))
    }

    pub fn snapshot(&self, depth: Option<usize>) -> OrderBookSnapshot {
        let depth = depth.unwrap_or(usize::MAX);
        OrderBookSnapshot {
            trading_pair: self.trading_pair.clone(),
            update_id: self.last_update_id,
            bids: self
                .bids
                .iter()
                .take(depth)
                .map(|(Reverse(price), amount)| OrderBookLevel::new(*price, *amount))
                .collect(),
            asks: self
                .asks
                .iter()
                .take(depth)
                .map(|(price, amount)| OrderBookLevel::new(*price, *amount))
                .collect(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookAction {
    Applied,
    Ignored,
    /// Held until the pending snapshot arrives
    Buffered,
    /// The caller must fetch a fresh snapshot for this pair
    ResyncRequired,
}

#[derive(Debug)]
struct BookState {
    book: OrderBook,
    buffer: Vec<OrderBookDiff>,
    resync_pending: bool,
}

/// Per-pair books plus the diff buffers used while a resync is in flight.
#[derive(Debug)]
pub struct OrderBookTracker {
    books: HashMap<TradingPair, BookState>,
    max_buffered: usize,
}

impl Default for OrderBookTracker {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl OrderBookTracker {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            books: HashMap::new(),
            max_buffered,
        }
    }

    fn state(&mut self, pair: &TradingPair) -> &mut BookState {
        self.books.entry(pair.clone()).or_insert_with(|| BookState {
            book: OrderBook::new(pair.clone()),
            buffer: Vec::new(),
            resync_pending: false,
        })
    }

    pub fn on_snapshot(&mut self, snapshot: &OrderBookSnapshot) -> BookAction {
        let state = self.state(&snapshot.trading_pair);
        state.book.apply_snapshot(snapshot);
        state.resync_pending = false;

        let mut buffered = std::mem::take(&mut state.buffer);
        buffered.retain(|diff| diff.final_update_id > snapshot.update_id);
        buffered.sort_by_key(|diff| diff.first_update_id);

        let gap_at = buffered
            .iter()
            .position(|diff| state.book.apply_diff(diff).is_err());

        match gap_at {
            Some(index) => {
                warn!(
                    pair = %snapshot.trading_pair,
                    snapshot_id = snapshot.update_id,
                    "buffered diffs do not continue the snapshot, resyncing again"
                );
                state.buffer = buffered.split_off(index);
                state.resync_pending = true;
                BookAction::ResyncRequired
            }
            None => BookAction::Applied,
        }
    }

    pub fn on_diff(&mut self, diff: OrderBookDiff) -> BookAction {
        let max_buffered = self.max_buffered;
        let state = self.state(&diff.trading_pair);

        if !state.book.is_valid() {
            if state.buffer.len() >= max_buffered {
                state.buffer.remove(0);
            }
            state.buffer.push(diff);
            if state.resync_pending {
                return BookAction::Buffered;
            }
            state.resync_pending = true;
            return BookAction::ResyncRequired;
        }

        match state.book.apply_diff(&diff) {
            Ok(DiffOutcome::Applied) => BookAction::Applied,
            Ok(DiffOutcome::Stale) => {
                debug!(pair = %diff.trading_pair, id = diff.final_update_id, "stale diff ignored");
                BookAction::Ignored
            }
            Err(gap) => {
                warn!(error = %gap, "order book gap, requesting snapshot");
                state.buffer.clear();
                state.buffer.push(diff);
                state.resync_pending = true;
                BookAction::ResyncRequired
            }
        }
    }

    /// A snapshot request failed; the next diff will ask again.
    pub fn resync_failed(&mut self, pair: &TradingPair) {
        if let Some(state) = self.books.get_mut(pair) {
            state.resync_pending = false;
        }
    }

    /// After a reconnect nothing in the local books can be trusted.
    pub fn invalidate_all(&mut self) {
        for state in self.books.values_mut() {
            state.book.invalidate();
            state.buffer.clear();
            state.resync_pending = false;
        }
    }

    pub fn order_book(&self, pair: &TradingPair) -> Option<OrderBookSnapshot> {
        self.books
            .get(pair)
            .filter(|state| state.book.is_valid())
            .map(|state| state.book.snapshot(None))
    }

    pub fn is_valid(&self, pair: &TradingPair) -> bool {
        self.books.get(pair).is_some_and(|s| s.book.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        "BTC-USDT".parse().unwrap()
    }

    fn snapshot(id: u64, bid: Decimal) -> OrderBookSnapshot {
        OrderBookSnapshot {
            trading_pair: pair(),
            update_id: id,
            bids: vec![
                OrderBookLevel::new(bid - dec!(1), dec!(2)),
                OrderBookLevel::new(bid, dec!(1)),
            ],
            asks: vec![OrderBookLevel::new(bid + dec!(1), dec!(1))],
            timestamp: id as i64,
        }
    }

    fn diff(id: u64, bid: Decimal, amount: Decimal) -> OrderBookDiff {
        OrderBookDiff {
            trading_pair: pair(),
            first_update_id: id,
            final_update_id: id,
            bids: vec![OrderBookLevel::new(bid, amount)],
            asks: vec![],
            timestamp: id as i64,
        }
    }

    #[test]
    fn test_snapshot_orders_levels() {
        let mut book = OrderBook::new(pair());
        book.apply_snapshot(&snapshot(100, dec!(50000)));

        let view = book.snapshot(None);
        assert_eq!(view.bids[0].price, dec!(50000));
        assert_eq!(view.bids[1].price, dec!(49999));
        assert_eq!(book.best_ask().unwrap().price, dec!(50001));
    }

    #[test]
    fn test_contiguous_diff_applies_and_zero_removes() {
        let mut book = OrderBook::new(pair());
        book.apply_snapshot(&snapshot(100, dec!(50000)));

        assert_eq!(
            book.apply_diff(&diff(101, dec!(50000), dec!(0))).unwrap(),
            DiffOutcome::Applied
        );
        assert_eq!(book.best_bid().unwrap().price, dec!(49999));
        assert_eq!(
            book.apply_diff(&diff(101, dec!(1), dec!(1))).unwrap(),
            DiffOutcome::Stale
        );
    }

    #[test]
    fn test_gap_invalidates_book() {
        let mut book = OrderBook::new(pair());
        book.apply_snapshot(&snapshot(100, dec!(50000)));

        let err = book.apply_diff(&diff(102, dec!(50000), dec!(3))).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::SequenceGap {
                expected: 101,
                received: 102,
                ..
            }
        ));
        assert!(!book.is_valid());
    }

    #[test]
    fn test_tracker_resync_discards_diffs_covered_by_snapshot() {
        let mut tracker = OrderBookTracker::default();
        tracker.on_snapshot(&snapshot(100, dec!(50000)));

        assert_eq!(tracker.on_diff(diff(101, dec!(50000), dec!(5))), BookAction::Applied);
        assert_eq!(
            tracker.on_diff(diff(103, dec!(50000), dec!(9))),
            BookAction::ResyncRequired
        );
        assert!(tracker.order_book(&pair()).is_none());
        assert_eq!(tracker.on_diff(diff(104, dec!(49990), dec!(4))), BookAction::Buffered);

        assert_eq!(tracker.on_snapshot(&snapshot(103, dec!(50100))), BookAction::Applied);
        let book = tracker.order_book(&pair()).unwrap();
        assert_eq!(book.update_id, 104);
        assert_eq!(book.bids[0].price, dec!(50100));
        // diff 103 predates the snapshot and must not leak into the book
        assert!(book.bids.iter().all(|l| l.price != dec!(50000)));
        assert!(book.bids.iter().any(|l| l.price == dec!(49990)));
    }

    #[test]
    fn test_tracker_requests_again_when_snapshot_is_too_old() {
        let mut tracker = OrderBookTracker::default();
        tracker.on_snapshot(&snapshot(100, dec!(50000)));
        tracker.on_diff(diff(103, dec!(50000), dec!(9)));

        // still one id short of the buffered diff
        assert_eq!(
            tracker.on_snapshot(&snapshot(101, dec!(50000))),
            BookAction::ResyncRequired
        );
        assert!(!tracker.is_valid(&pair()));
    }

    #[test]
    fn test_invalidate_all_forces_new_request() {
        let mut tracker = OrderBookTracker::default();
        tracker.on_snapshot(&snapshot(100, dec!(50000)));
        tracker.invalidate_all();
        assert_eq!(
            tracker.on_diff(diff(101, dec!(50000), dec!(1))),
            BookAction::ResyncRequired
        );
    }
}
