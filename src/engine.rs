// src/engine.rs
//
// Matching engine: crosses client orders against the resting books with
// price-time priority and produces fills. Single-threaded over the books it
// owns; the fill callback runs inline on the caller thread.
//
// TIF handling: DAY/GTC limit remainders rest in the book; IOC sweeps as
// deep as its limit allows in one pass and cancels the rest; FOK pre-scans
// contra liquidity and either crosses in full or cancels with the book
// untouched.

use crate::book::{BookParams, BookRegistry};
use crate::events::{Side, SymbolId};
use crate::util::now_nanos;
use hashbrown::HashMap;
use smallvec::SmallVec;

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Day,
    Ioc,
    Fok,
    Gtc,
}

impl TimeInForce {
    #[inline]
    pub fn can_rest(self) -> bool {
        matches!(self, TimeInForce::Day | TimeInForce::Gtc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOrder {
    pub id: OrderId,
    pub symbol: SymbolId,
    pub side: Side,
    pub ord_type: OrderType,
    pub tif: TimeInForce,
    /// Limit price; ignored for market orders.
    pub price: u32,
    pub quantity: u32,
    pub filled: u32,
    pub status: OrderStatus,
    pub received_ns: u64,
}

impl ClientOrder {
    pub fn limit(id: OrderId, symbol: SymbolId, side: Side, qty: u32, px: u32, tif: TimeInForce) -> Self {
        ClientOrder {
            id,
            symbol,
            side,
            ord_type: OrderType::Limit,
            tif,
            price: px,
            quantity: qty,
            filled: 0,
            status: OrderStatus::New,
            received_ns: 0,
        }
    }

    pub fn market(id: OrderId, symbol: SymbolId, side: Side, qty: u32) -> Self {
        ClientOrder {
            id,
            symbol,
            side,
            ord_type: OrderType::Market,
            tif: TimeInForce::Ioc,
            price: 0,
            quantity: qty,
            filled: 0,
            status: OrderStatus::New,
            received_ns: 0,
        }
    }

    #[inline]
    pub fn remaining(&self) -> u32 {
        self.quantity - self.filled
    }

    #[inline]
    pub fn is_buy(&self) -> bool {
        self.side == Side::Bid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    pub trade_id: u64,
    pub symbol: SymbolId,
    pub aggressive_id: OrderId,
    pub passive_id: OrderId,
    /// Always the passive order's resting price.
    pub price: u32,
    pub quantity: u32,
    pub aggressive_side: Side,
    pub exec_ns: u64,
}

#[derive(Debug, PartialEq)]
pub struct MatchResult {
    pub final_status: OrderStatus,
    pub fills: Vec<Fill>,
    pub total_filled: u32,
}

impl MatchResult {
    fn rejected() -> Self {
        MatchResult { final_status: OrderStatus::Rejected, fills: Vec::new(), total_filled: 0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Level1Data {
    pub symbol: SymbolId,
    pub bid_price: u32,
    pub bid_quantity: u64,
    pub ask_price: u32,
    pub ask_quantity: u64,
    pub ts_ns: u64,
}

impl Level1Data {
    #[inline]
    pub fn has_bid(&self) -> bool {
        self.bid_price > 0
    }

    #[inline]
    pub fn has_ask(&self) -> bool {
        self.ask_price > 0
    }

    pub fn spread(&self) -> u32 {
        if self.has_bid() && self.has_ask() {
            self.ask_price - self.bid_price
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2Level {
    pub price: u32,
    pub quantity: u64,
    pub order_count: u32,
}

#[derive(Debug, Clone)]
pub struct Level2Data {
    pub symbol: SymbolId,
    pub bids: SmallVec<[L2Level; 16]>,
    pub asks: SmallVec<[L2Level; 16]>,
    pub ts_ns: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub orders_processed: u64,
    pub orders_rejected: u64,
    pub total_fills: u64,
    pub total_volume: u64,
}

pub type FillCallback = Box<dyn FnMut(&Fill) + Send>;

pub struct MatchingEngine {
    books: BookRegistry,
    active: HashMap<OrderId, ClientOrder>,
    next_trade_id: u64,
    fill_callback: Option<FillCallback>,
    stats: EngineStats,
}

impl MatchingEngine {
    pub fn new(params: BookParams) -> Self {
        Self {
            books: BookRegistry::new(params),
            active: HashMap::new(),
            next_trade_id: 1,
            fill_callback: None,
            stats: EngineStats::default(),
        }
    }

    pub fn set_fill_callback(&mut self, cb: FillCallback) {
        self.fill_callback = Some(cb);
    }

    /// Feed-side access: the apply layer mutates the same books client
    /// orders cross against.
    pub fn books(&self) -> &BookRegistry {
        &self.books
    }

    pub fn books_mut(&mut self) -> &mut BookRegistry {
        &mut self.books
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn active_orders(&self) -> usize {
        self.active.len()
    }

    pub fn get_order(&self, id: OrderId) -> Option<&ClientOrder> {
        self.active.get(&id)
    }

    pub fn process_order(&mut self, mut order: ClientOrder) -> MatchResult {
        order.received_ns = now_nanos();
        order.filled = 0;
        order.status = OrderStatus::New;
        self.stats.orders_processed += 1;

        if order.quantity == 0 {
            self.stats.orders_rejected += 1;
            return MatchResult::rejected();
        }

        self.books.get_or_create(order.symbol);

        if order.ord_type == OrderType::Limit && order.tif == TimeInForce::Fok {
            let needed = u64::from(order.quantity);
            let avail = self
                .books
                .get(order.symbol)
                .map_or(0, |b| b.available_up_to(order.side.opposite(), Some(order.price), needed));
            if avail < needed {
                // All or nothing: leave the book untouched.
                return MatchResult {
                    final_status: OrderStatus::Canceled,
                    fills: Vec::new(),
                    total_filled: 0,
                };
            }
        }

        let mut fills = Vec::new();
        self.attempt_cross(&mut order, &mut fills);
        let total_filled = order.filled;

        let final_status = if order.remaining() == 0 {
            OrderStatus::Filled
        } else if order.ord_type == OrderType::Limit && order.tif.can_rest() {
            let rested = self
                .books
                .get_mut(order.symbol)
                .map_or(false, |b| b.add(order.id, order.side, order.remaining(), order.price));
            if rested {
                order.status = if total_filled > 0 {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::New
                };
                self.active.insert(order.id, order);
                order.status
            } else if total_filled > 0 {
                // Could not rest the remainder (pool full / off-band price).
                OrderStatus::PartiallyFilled
            } else {
                self.stats.orders_rejected += 1;
                OrderStatus::Rejected
            }
        } else if total_filled > 0 {
            // IOC / market leftover is canceled, never rests.
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Canceled
        };

        MatchResult { final_status, fills, total_filled }
    }

    /// Consume contra liquidity in price-time order: best level first, FIFO
    /// inside each level. Fill price is the passive resting price.
    fn attempt_cross(&mut self, order: &mut ClientOrder, fills: &mut Vec<Fill>) {
        while order.remaining() > 0 {
            let contra = order.side.opposite();
            let (best, passive_id) = {
                let book = match self.books.get(order.symbol) {
                    Some(b) => b,
                    None => break,
                };
                let best = if order.is_buy() { book.best_ask() } else { book.best_bid() };
                if best == 0 {
                    break;
                }
                if order.ord_type == OrderType::Limit {
                    let crosses = if order.is_buy() { order.price >= best } else { order.price <= best };
                    if !crosses {
                        break;
                    }
                }
                match book.head_order(contra, best) {
                    Some((id, _)) => (best, id),
                    None => break,
                }
            };

            let take = {
                let book = self.books.get_mut(order.symbol).unwrap();
                let passive_rem = book.order(passive_id).map_or(0, |n| n.remaining);
                let take = order.remaining().min(passive_rem);
                book.execute(passive_id, take)
            };
            if take == 0 {
                break;
            }
            order.filled += take;

            let fill = Fill {
                trade_id: self.next_trade_id,
                symbol: order.symbol,
                aggressive_id: order.id,
                passive_id,
                price: best,
                quantity: take,
                aggressive_side: order.side,
                exec_ns: now_nanos(),
            };
            self.next_trade_id += 1;
            self.stats.total_fills += 1;
            self.stats.total_volume += u64::from(take);
            fills.push(fill);

            // A fully consumed passive order may have been a tracked client
            // order; retire it.
            let passive_sym = self.active.get(&passive_id).map(|p| p.symbol);
            if let Some(psym) = passive_sym {
                if self.books.get(psym).map_or(true, |b| b.order(passive_id).is_none()) {
                    self.active.remove(&passive_id);
                }
            }

            if let Some(cb) = self.fill_callback.as_mut() {
                cb(&fill);
            }
        }
    }

    /// Remove a tracked order from the book and the active set. False when
    /// the id is unknown.
    pub fn cancel_order(&mut self, id: OrderId) -> bool {
        match self.active.remove(&id) {
            Some(order) => {
                if let Some(book) = self.books.get_mut(order.symbol) {
                    book.delete(id);
                }
                true
            }
            None => false,
        }
    }

    /// Cancel-then-process. Atomicity is best effort: a failed new order
    /// leaves the old one canceled.
    pub fn replace_order(&mut self, old_id: OrderId, new_order: ClientOrder) -> MatchResult {
        if !self.cancel_order(old_id) {
            self.stats.orders_rejected += 1;
            return MatchResult::rejected();
        }
        self.process_order(new_order)
    }

    pub fn get_level1_data(&self, symbol: SymbolId) -> Level1Data {
        let mut l1 = Level1Data {
            symbol,
            bid_price: 0,
            bid_quantity: 0,
            ask_price: 0,
            ask_quantity: 0,
            ts_ns: now_nanos(),
        };
        if let Some(book) = self.books.get(symbol) {
            l1.bid_price = book.best_bid();
            l1.ask_price = book.best_ask();
            if l1.bid_price > 0 {
                l1.bid_quantity = book.level(Side::Bid, l1.bid_price).map_or(0, |(q, _)| q);
            }
            if l1.ask_price > 0 {
                l1.ask_quantity = book.level(Side::Ask, l1.ask_price).map_or(0, |(q, _)| q);
            }
        }
        l1
    }

    pub fn get_level2_data(&self, symbol: SymbolId, depth: usize) -> Level2Data {
        let mut l2 = Level2Data {
            symbol,
            bids: SmallVec::new(),
            asks: SmallVec::new(),
            ts_ns: now_nanos(),
        };
        if let Some(book) = self.books.get(symbol) {
            for (price, quantity, order_count) in book.depth(Side::Bid, depth) {
                l2.bids.push(L2Level { price, quantity, order_count });
            }
            for (price, quantity, order_count) in book.depth(Side::Ask, depth) {
                l2.asks.push(L2Level { price, quantity, order_count });
            }
        }
        l2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYM: SymbolId = 1;

    fn engine() -> MatchingEngine {
        MatchingEngine::new(BookParams::default())
    }

    fn seed_book(e: &mut MatchingEngine) {
        // S1: two bids, two asks.
        for o in [
            ClientOrder::limit(1, SYM, Side::Bid, 100, 49_900, TimeInForce::Day),
            ClientOrder::limit(2, SYM, Side::Bid, 200, 49_800, TimeInForce::Day),
            ClientOrder::limit(3, SYM, Side::Ask, 150, 50_100, TimeInForce::Day),
            ClientOrder::limit(4, SYM, Side::Ask, 300, 50_200, TimeInForce::Day),
        ] {
            let r = e.process_order(o);
            assert_eq!(r.final_status, OrderStatus::New);
            assert!(r.fills.is_empty());
        }
    }

    #[test]
    fn resting_and_best_of_book() {
        let mut e = engine();
        seed_book(&mut e);
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.best_bid(), 49_900);
        assert_eq!(book.best_ask(), 50_100);
        assert_eq!(book.level(Side::Bid, 49_900), Some((100, 1)));
        assert_eq!(book.level(Side::Bid, 49_800), Some((200, 1)));
        assert_eq!(book.level(Side::Ask, 50_100), Some((150, 1)));
        assert_eq!(book.level(Side::Ask, 50_200), Some((300, 1)));
        assert_eq!(e.active_orders(), 4);
    }

    #[test]
    fn market_buy_crosses_best_ask() {
        let mut e = engine();
        seed_book(&mut e);
        let r = e.process_order(ClientOrder::market(5, SYM, Side::Bid, 80));
        assert_eq!(r.final_status, OrderStatus::Filled);
        assert_eq!(r.total_filled, 80);
        assert_eq!(r.fills.len(), 1);
        let f = &r.fills[0];
        assert_eq!((f.aggressive_id, f.passive_id, f.price, f.quantity), (5, 3, 50_100, 80));
        assert_eq!(f.aggressive_side, Side::Bid);
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.best_ask(), 50_100);
        assert_eq!(book.level(Side::Ask, 50_100), Some((70, 1)));
        assert_eq!(book.order(3).unwrap().remaining, 70);
    }

    #[test]
    fn limit_sell_at_bid_crosses() {
        let mut e = engine();
        seed_book(&mut e);
        e.process_order(ClientOrder::market(5, SYM, Side::Bid, 80));
        let r = e.process_order(ClientOrder::limit(6, SYM, Side::Ask, 50, 49_900, TimeInForce::Day));
        assert_eq!(r.final_status, OrderStatus::Filled);
        assert_eq!(r.fills.len(), 1);
        let f = &r.fills[0];
        assert_eq!((f.aggressive_id, f.passive_id, f.price, f.quantity), (6, 1, 49_900, 50));
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.order(1).unwrap().remaining, 50);
        assert!(book.order(6).is_none()); // fully filled, never rested
    }

    #[test]
    fn ioc_partial_sweeps_levels_then_cancels() {
        let mut e = engine();
        seed_book(&mut e);
        e.process_order(ClientOrder::market(5, SYM, Side::Bid, 80));
        e.process_order(ClientOrder::limit(6, SYM, Side::Ask, 50, 49_900, TimeInForce::Day));
        // S4: IOC buy 500 @ 50_200 sweeps 70 @ 50_100 then 300 @ 50_200.
        let r = e.process_order(ClientOrder::limit(7, SYM, Side::Bid, 500, 50_200, TimeInForce::Ioc));
        assert_eq!(r.final_status, OrderStatus::PartiallyFilled);
        assert_eq!(r.total_filled, 370);
        let picks: Vec<_> = r.fills.iter().map(|f| (f.price, f.quantity)).collect();
        assert_eq!(picks, vec![(50_100, 70), (50_200, 300)]);
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.best_ask(), 0);
        assert!(book.order(7).is_none()); // remainder canceled, never rests
        assert!(e.get_order(7).is_none());
    }

    #[test]
    fn replace_with_price_change() {
        let mut e = engine();
        seed_book(&mut e);
        let r = e.replace_order(3, ClientOrder::limit(30, SYM, Side::Ask, 120, 50_300, TimeInForce::Day));
        assert_eq!(r.final_status, OrderStatus::New);
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.level(Side::Ask, 50_100), None);
        assert_eq!(book.level(Side::Ask, 50_300), Some((120, 1)));
        assert_eq!(book.best_ask(), 50_200);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut e = engine();
        let r = e.process_order(ClientOrder::limit(1, SYM, Side::Bid, 0, 49_900, TimeInForce::Day));
        assert_eq!(r.final_status, OrderStatus::Rejected);
        assert!(r.fills.is_empty());
        assert_eq!(e.stats().orders_rejected, 1);
    }

    #[test]
    fn fok_with_insufficient_liquidity_leaves_book_unchanged() {
        let mut e = engine();
        seed_book(&mut e);
        // Only 150 available at or below 50_100; ask for 200.
        let r = e.process_order(ClientOrder::limit(9, SYM, Side::Bid, 200, 50_100, TimeInForce::Fok));
        assert_eq!(r.final_status, OrderStatus::Canceled);
        assert!(r.fills.is_empty());
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.level(Side::Ask, 50_100), Some((150, 1)));
        assert_eq!(book.level(Side::Ask, 50_200), Some((300, 1)));
    }

    #[test]
    fn fok_with_sufficient_liquidity_fills_in_full() {
        let mut e = engine();
        seed_book(&mut e);
        // 150 + 300 available through 50_200; ask for 400.
        let r = e.process_order(ClientOrder::limit(9, SYM, Side::Bid, 400, 50_200, TimeInForce::Fok));
        assert_eq!(r.final_status, OrderStatus::Filled);
        assert_eq!(r.total_filled, 400);
        assert_eq!(r.fills.len(), 2);
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.level(Side::Ask, 50_200), Some((50, 1)));
    }

    #[test]
    fn price_time_priority_within_level() {
        let mut e = engine();
        e.process_order(ClientOrder::limit(1, SYM, Side::Ask, 100, 50_000, TimeInForce::Day));
        e.process_order(ClientOrder::limit(2, SYM, Side::Ask, 100, 50_000, TimeInForce::Day));
        let r = e.process_order(ClientOrder::limit(3, SYM, Side::Bid, 150, 50_000, TimeInForce::Day));
        assert_eq!(r.fills.len(), 2);
        // Order 1 arrived first and is consumed first, in full.
        assert_eq!((r.fills[0].passive_id, r.fills[0].quantity), (1, 100));
        assert_eq!((r.fills[1].passive_id, r.fills[1].quantity), (2, 50));
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.order(2).unwrap().remaining, 50);
    }

    #[test]
    fn fills_account_for_aggressor_quantity() {
        let mut e = engine();
        seed_book(&mut e);
        let r = e.process_order(ClientOrder::limit(8, SYM, Side::Bid, 260, 50_200, TimeInForce::Day));
        let sum: u32 = r.fills.iter().map(|f| f.quantity).sum();
        assert_eq!(sum, r.total_filled);
        assert_eq!(sum, 260);
        for f in &r.fills {
            // Every fill prints at a resting ask price.
            assert!(f.price == 50_100 || f.price == 50_200);
        }
    }

    #[test]
    fn cancel_order_removes_resting_remainder() {
        let mut e = engine();
        seed_book(&mut e);
        assert!(e.cancel_order(1));
        assert!(!e.cancel_order(1));
        let book = e.books().get(SYM).unwrap();
        assert_eq!(book.level(Side::Bid, 49_900), None);
        assert_eq!(book.best_bid(), 49_800);
    }

    #[test]
    fn fill_callback_sees_fills_in_order() {
        use std::sync::{Arc, Mutex};
        let mut e = engine();
        seed_book(&mut e);
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        e.set_fill_callback(Box::new(move |f| sink.lock().unwrap().push(f.trade_id)));
        let r = e.process_order(ClientOrder::limit(9, SYM, Side::Bid, 200, 50_200, TimeInForce::Day));
        assert_eq!(r.fills.len(), 2);
        let got = seen.lock().unwrap().clone();
        assert_eq!(got.len(), 2);
        assert!(got[0] < got[1]);
    }

    #[test]
    fn passive_client_order_is_retired_when_consumed() {
        let mut e = engine();
        e.process_order(ClientOrder::limit(1, SYM, Side::Ask, 100, 50_000, TimeInForce::Day));
        assert_eq!(e.active_orders(), 1);
        let r = e.process_order(ClientOrder::market(2, SYM, Side::Bid, 100));
        assert_eq!(r.final_status, OrderStatus::Filled);
        assert_eq!(e.active_orders(), 0);
    }
}
