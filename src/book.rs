// src/book.rs
//
// Per-symbol limit order book: two price-indexed level arrays over a closed
// price interval, intrusive FIFO order lists inside each level, and the
// arena/index for order storage. All mutations are O(1) except the best
// rescan when the outermost level empties.
//
// The book is a passive observer of the feed: unknown ids are no-ops and
// duplicate adds are ignored, per ITCH semantics.

use crate::arena::{IdIndex, OrderArena, OrderNode, NIL};
use crate::events::{Side, SymbolId};
use hashbrown::HashMap;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy)]
pub struct PriceLevel {
    pub qty: u64,
    pub count: u32,
    head: u32,
    tail: u32,
}

impl PriceLevel {
    const fn inactive() -> Self {
        PriceLevel { qty: 0, count: 0, head: NIL, tail: NIL }
    }
}

/// Book sizing knobs; one instance shared by every book in a registry.
#[derive(Debug, Clone, Copy)]
pub struct BookParams {
    pub p_min: u32,
    pub p_max: u32,
    pub hash_capacity: usize,
    pub probe_limit: usize,
    pub pool_capacity: usize,
}

impl Default for BookParams {
    fn default() -> Self {
        BookParams {
            p_min: 40_000,
            p_max: 60_000,
            hash_capacity: 65_536,
            probe_limit: 64,
            pool_capacity: 1_000_000,
        }
    }
}

pub struct OrderBook {
    p_min: u32,
    p_max: u32,
    bids: Box<[PriceLevel]>,
    asks: Box<[PriceLevel]>,
    arena: OrderArena,
    index: IdIndex,
    // Cached outermost active prices; 0 = side empty.
    best_bid: u32,
    best_ask: u32,
    arrival: u64,
}

impl OrderBook {
    pub fn new(params: &BookParams) -> Self {
        let span = (params.p_max - params.p_min + 1) as usize;
        Self {
            p_min: params.p_min,
            p_max: params.p_max,
            bids: vec![PriceLevel::inactive(); span].into_boxed_slice(),
            asks: vec![PriceLevel::inactive(); span].into_boxed_slice(),
            arena: OrderArena::new(params.pool_capacity),
            index: IdIndex::new(params.hash_capacity, params.probe_limit),
            best_bid: 0,
            best_ask: 0,
            arrival: 0,
        }
    }

    #[inline]
    fn slot(&self, px: u32) -> usize {
        (px - self.p_min) as usize
    }

    #[inline]
    fn level_mut(&mut self, side: Side, px: u32) -> &mut PriceLevel {
        let at = self.slot(px);
        match side {
            Side::Bid => &mut self.bids[at],
            Side::Ask => &mut self.asks[at],
        }
    }

    /// Highest active bid price, 0 when the side is empty.
    #[inline]
    pub fn best_bid(&self) -> u32 {
        self.best_bid
    }

    /// Lowest active ask price, 0 when the side is empty.
    #[inline]
    pub fn best_ask(&self) -> u32 {
        self.best_ask
    }

    /// Aggregate quantity and order count at a price, None if inactive.
    pub fn level(&self, side: Side, px: u32) -> Option<(u64, u32)> {
        if px < self.p_min || px > self.p_max {
            return None;
        }
        let lvl = match side {
            Side::Bid => &self.bids[self.slot(px)],
            Side::Ask => &self.asks[self.slot(px)],
        };
        if lvl.count == 0 {
            None
        } else {
            Some((lvl.qty, lvl.count))
        }
    }

    /// Time-priority head order at a price: (id, remaining).
    pub fn head_order(&self, side: Side, px: u32) -> Option<(u64, u32)> {
        if px < self.p_min || px > self.p_max {
            return None;
        }
        let lvl = match side {
            Side::Bid => &self.bids[self.slot(px)],
            Side::Ask => &self.asks[self.slot(px)],
        };
        if lvl.head == NIL {
            return None;
        }
        let n = self.arena.get(lvl.head);
        Some((n.id, n.remaining))
    }

    pub fn order(&self, id: u64) -> Option<&OrderNode> {
        self.index.find(id).map(|h| self.arena.get(h))
    }

    pub fn live_orders(&self) -> usize {
        self.index.len()
    }

    pub fn index_dropped_inserts(&self) -> u64 {
        self.index.dropped_inserts
    }

    /// Active levels from best outward, up to `depth`: (price, qty, count).
    pub fn depth(&self, side: Side, depth: usize) -> SmallVec<[(u32, u64, u32); 16]> {
        let mut out = SmallVec::new();
        if depth == 0 {
            return out;
        }
        match side {
            Side::Bid => {
                let mut px = self.best_bid;
                while px >= self.p_min && px > 0 {
                    let lvl = &self.bids[self.slot(px)];
                    if lvl.count > 0 {
                        out.push((px, lvl.qty, lvl.count));
                        if out.len() == depth {
                            break;
                        }
                    }
                    px -= 1;
                }
            }
            Side::Ask => {
                if self.best_ask == 0 {
                    return out;
                }
                let mut px = self.best_ask;
                while px <= self.p_max {
                    let lvl = &self.asks[self.slot(px)];
                    if lvl.count > 0 {
                        out.push((px, lvl.qty, lvl.count));
                        if out.len() == depth {
                            break;
                        }
                    }
                    px += 1;
                }
            }
        }
        out
    }

    /// Contra liquidity reachable from the best price, bounded by an
    /// optional limit price, accumulated until `needed` is covered. Used by
    /// the matching engine's fill-or-kill pre-scan.
    pub fn available_up_to(&self, side: Side, limit_px: Option<u32>, needed: u64) -> u64 {
        let mut sum = 0u64;
        match side {
            Side::Ask => {
                if self.best_ask == 0 {
                    return 0;
                }
                let mut px = self.best_ask;
                while px <= self.p_max {
                    if let Some(limit) = limit_px {
                        if px > limit {
                            break;
                        }
                    }
                    sum += self.asks[self.slot(px)].qty;
                    if sum >= needed {
                        break;
                    }
                    px += 1;
                }
            }
            Side::Bid => {
                let mut px = self.best_bid;
                while px >= self.p_min && px > 0 {
                    if let Some(limit) = limit_px {
                        if px < limit {
                            break;
                        }
                    }
                    sum += self.bids[self.slot(px)].qty;
                    if sum >= needed {
                        break;
                    }
                    px -= 1;
                }
            }
        }
        sum
    }

    /// Add an order at the tail of its price level (time priority). Returns
    /// false when the order was not stored: out-of-range price, zero
    /// quantity, duplicate id, or pool/index exhaustion.
    pub fn add(&mut self, id: u64, side: Side, qty: u32, px: u32) -> bool {
        if px < self.p_min || px > self.p_max || qty == 0 {
            return false;
        }
        if self.index.find(id).is_some() {
            return false;
        }
        let handle = match self.arena.acquire() {
            Some(h) => h,
            None => return false,
        };
        self.arrival += 1;
        let arrival = self.arrival;

        let prev_tail = {
            let lvl = self.level_mut(side, px);
            let t = lvl.tail;
            lvl.qty += u64::from(qty);
            lvl.count += 1;
            lvl.tail = handle;
            if lvl.head == NIL {
                lvl.head = handle;
            }
            t
        };
        if prev_tail != NIL {
            self.arena.get_mut(prev_tail).next = handle;
        }
        {
            let n = self.arena.get_mut(handle);
            *n = OrderNode {
                id,
                side,
                price: px,
                original_qty: qty,
                remaining: qty,
                arrival,
                prev: prev_tail,
                next: NIL,
            };
        }
        if !self.index.insert(id, handle) {
            // Probe window exhausted: back the order out so it is absent
            // rather than linked-but-unfindable.
            self.level_mut(side, px).qty -= u64::from(qty);
            self.unlink(handle);
            self.arena.release(handle);
            return false;
        }

        match side {
            Side::Bid => {
                if self.best_bid == 0 || px > self.best_bid {
                    self.best_bid = px;
                }
            }
            Side::Ask => {
                if self.best_ask == 0 || px < self.best_ask {
                    self.best_ask = px;
                }
            }
        }
        true
    }

    /// Execute up to `qty` shares against a resting order, clamped to its
    /// remainder. Fully consumed orders are unlinked and released. Returns
    /// the executed amount (0 for unknown ids).
    pub fn execute(&mut self, id: u64, qty: u32) -> u32 {
        let handle = match self.index.find(id) {
            Some(h) => h,
            None => return 0,
        };
        let (side, px, remaining) = {
            let n = self.arena.get(handle);
            (n.side, n.price, n.remaining)
        };
        let d = qty.min(remaining);
        {
            let lvl = self.level_mut(side, px);
            lvl.qty -= u64::from(d);
        }
        let n = self.arena.get_mut(handle);
        n.remaining -= d;
        if n.remaining == 0 {
            self.unlink(handle);
            self.index.remove(id);
            self.arena.release(handle);
            self.refresh_best(side, px);
        }
        d
    }

    /// Feed semantics: a partial cancel reduces shares exactly like an
    /// execution.
    #[inline]
    pub fn cancel(&mut self, id: u64, qty: u32) -> u32 {
        self.execute(id, qty)
    }

    /// Remove the full remaining quantity. No-op on unknown ids.
    pub fn delete(&mut self, id: u64) -> bool {
        let handle = match self.index.remove(id) {
            Some(h) => h,
            None => return false,
        };
        let (side, px, remaining) = {
            let n = self.arena.get(handle);
            (n.side, n.price, n.remaining)
        };
        {
            let lvl = self.level_mut(side, px);
            lvl.qty -= u64::from(remaining);
        }
        self.unlink(handle);
        self.arena.release(handle);
        self.refresh_best(side, px);
        true
    }

    /// Replace preserves side. Same price rewrites id/quantity in place
    /// (keeping queue position); a price change is remove-then-add under the
    /// new id. Unknown originals are discarded.
    pub fn replace(&mut self, old_id: u64, new_id: u64, qty: u32, px: u32) -> bool {
        let handle = match self.index.find(old_id) {
            Some(h) => h,
            None => return false,
        };
        let (side, old_px, old_remaining) = {
            let n = self.arena.get(handle);
            (n.side, n.price, n.remaining)
        };

        if px == old_px && qty > 0 {
            {
                let lvl = self.level_mut(side, old_px);
                lvl.qty = lvl.qty - u64::from(old_remaining) + u64::from(qty);
            }
            {
                let n = self.arena.get_mut(handle);
                n.id = new_id;
                n.remaining = qty;
                n.original_qty = qty;
            }
            self.index.remove(old_id);
            if !self.index.insert(new_id, handle) {
                // Cannot index the renamed order; take it out entirely.
                let lvl = self.level_mut(side, old_px);
                lvl.qty -= u64::from(qty);
                self.unlink(handle);
                self.arena.release(handle);
                self.refresh_best(side, old_px);
                return false;
            }
            return true;
        }

        self.delete(old_id);
        if qty == 0 {
            return true;
        }
        self.add(new_id, side, qty, px)
    }

    /// Drop every order and level; sizing is kept.
    pub fn clear(&mut self) {
        self.bids.fill(PriceLevel::inactive());
        self.asks.fill(PriceLevel::inactive());
        self.arena.reset();
        self.index.clear();
        self.best_bid = 0;
        self.best_ask = 0;
    }

    fn unlink(&mut self, handle: u32) {
        let (side, px, prev, next) = {
            let n = self.arena.get(handle);
            (n.side, n.price, n.prev, n.next)
        };
        if prev != NIL {
            self.arena.get_mut(prev).next = next;
        }
        if next != NIL {
            self.arena.get_mut(next).prev = prev;
        }
        let lvl = self.level_mut(side, px);
        if lvl.head == handle {
            lvl.head = next;
        }
        if lvl.tail == handle {
            lvl.tail = prev;
        }
        lvl.count -= 1;
        if lvl.count == 0 {
            debug_assert_eq!(lvl.qty, 0);
            lvl.head = NIL;
            lvl.tail = NIL;
        }
    }

    /// Rescan inward when the outermost level may have emptied.
    fn refresh_best(&mut self, side: Side, px: u32) {
        match side {
            Side::Bid => {
                if px != self.best_bid || self.bids[self.slot(px)].count > 0 {
                    return;
                }
                let mut p = px;
                self.best_bid = 0;
                while p >= self.p_min && p > 0 {
                    if self.bids[self.slot(p)].count > 0 {
                        self.best_bid = p;
                        break;
                    }
                    p -= 1;
                }
            }
            Side::Ask => {
                if px != self.best_ask || self.asks[self.slot(px)].count > 0 {
                    return;
                }
                let mut p = px;
                self.best_ask = 0;
                while p <= self.p_max {
                    if self.asks[self.slot(p)].count > 0 {
                        self.best_ask = p;
                        break;
                    }
                    p += 1;
                }
            }
        }
    }
}

/// Lazy SymbolId -> book map. Books are created with the registry's shared
/// sizing on first touch.
pub struct BookRegistry {
    params: BookParams,
    books: HashMap<SymbolId, OrderBook>,
}

impl BookRegistry {
    pub fn new(params: BookParams) -> Self {
        Self { params, books: HashMap::new() }
    }

    #[inline]
    pub fn get_or_create(&mut self, sym: SymbolId) -> &mut OrderBook {
        let params = self.params;
        self.books.entry(sym).or_insert_with(|| OrderBook::new(&params))
    }

    #[inline]
    pub fn get(&self, sym: SymbolId) -> Option<&OrderBook> {
        self.books.get(&sym)
    }

    #[inline]
    pub fn get_mut(&mut self, sym: SymbolId) -> Option<&mut OrderBook> {
        self.books.get_mut(&sym)
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn live_orders(&self) -> usize {
        self.books.values().map(|b| b.live_orders()).sum()
    }

    pub fn index_dropped_inserts(&self) -> u64 {
        self.books.values().map(|b| b.index_dropped_inserts()).sum()
    }

    /// Diagnostic dump of every book's top of book. Not on the hot path.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let mut syms: Vec<_> = self.books.keys().copied().collect();
        syms.sort_unstable();
        for sym in syms {
            let b = &self.books[&sym];
            let _ = writeln!(
                out,
                "sym={} best_bid={} best_ask={} live_orders={}",
                sym,
                b.best_bid(),
                b.best_ask(),
                b.live_orders()
            );
        }
        out
    }
}
