// src/apply.rs
//
// Routes decoded feed events onto the owning book. The feed identifies
// executes/cancels/deletes by order id only, so the router keeps an
// order-id -> symbol map to find the book. Unknown ids are no-ops (the
// book is a passive observer of the feed).

use crate::book::BookRegistry;
use crate::events::{Event, SymbolId};
use hashbrown::HashMap;

pub struct EventRouter {
    owner: HashMap<u64, SymbolId>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self { owner: HashMap::with_capacity(1 << 16) }
    }

    pub fn tracked_orders(&self) -> usize {
        self.owner.len()
    }

    /// Apply one event; returns the touched symbol when the book changed
    /// (the caller publishes market data for it).
    pub fn apply(&mut self, ev: &Event, books: &mut BookRegistry) -> Option<SymbolId> {
        match *ev {
            Event::Add { order_id, side, qty, px, sym } => {
                if sym == 0 {
                    // Symbol table full; the event is dropped.
                    crate::metrics::inc_symbol_table_drop();
                    return None;
                }
                let book = books.get_or_create(sym);
                if book.add(order_id, side, qty, px) {
                    self.owner.insert(order_id, sym);
                    Some(sym)
                } else {
                    None
                }
            }
            Event::Execute { order_id, exec_qty } => self.reduce(order_id, exec_qty, books),
            Event::Cancel { order_id, qty } => self.reduce(order_id, qty, books),
            Event::Delete { order_id } => {
                let sym = self.owner.remove(&order_id)?;
                let book = books.get_mut(sym)?;
                book.delete(order_id).then_some(sym)
            }
            Event::Replace { old_id, new_id, qty, px, sym } => {
                // sym == 0 inherits the original's book; the feed never
                // moves an order across symbols.
                let owner_sym = match self.owner.get(&old_id) {
                    Some(&s) => s,
                    None => {
                        if sym == 0 {
                            return None; // original unknown, event discarded
                        }
                        sym
                    }
                };
                let book = books.get_mut(owner_sym)?;
                let changed = book.replace(old_id, new_id, qty, px);
                if book.order(old_id).is_none() {
                    self.owner.remove(&old_id);
                }
                if book.order(new_id).is_some() {
                    self.owner.insert(new_id, owner_sym);
                }
                changed.then_some(owner_sym)
            }
        }
    }

    /// Execute and Cancel share reduce-shares semantics on the feed.
    fn reduce(&mut self, order_id: u64, qty: u32, books: &mut BookRegistry) -> Option<SymbolId> {
        let sym = *self.owner.get(&order_id)?;
        let book = books.get_mut(sym)?;
        let done = book.execute(order_id, qty);
        if book.order(order_id).is_none() {
            self.owner.remove(&order_id);
        }
        (done > 0).then_some(sym)
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
