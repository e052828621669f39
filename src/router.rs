// src/router.rs
//
// Order-entry boundary. The FIX session layer lives outside the core and
// hands over already-decoded requests; this router validates them against
// the symbol manager and forwards the survivors to the matching engine.
// Every rejection carries a typed reason the gateway can map onto an
// execution report.

use crate::engine::{ClientOrder, MatchResult, MatchingEngine, OrderStatus, OrderType, TimeInForce};
use crate::events::Side;
use crate::symman::SymbolManager;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub cl_ord_id: u64,
    pub symbol_name: String,
    pub side: Side,
    pub ord_type: OrderType,
    pub tif: TimeInForce,
    pub quantity: u32,
    /// Required for limit orders, ignored for market orders.
    pub price: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingField,
    InvalidQuantity,
    InvalidPrice,
    UnknownSymbol,
    MarketClosed,
    UnknownOrder,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::MissingField => "missing required field",
            RejectReason::InvalidQuantity => "invalid quantity",
            RejectReason::InvalidPrice => "invalid price",
            RejectReason::UnknownSymbol => "unknown symbol",
            RejectReason::MarketClosed => "market closed",
            RejectReason::UnknownOrder => "unknown order",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RoutingStats {
    pub total_orders: u64,
    pub routed_orders: u64,
    pub rejected_orders: u64,
    pub unknown_symbol_orders: u64,
    pub market_closed_orders: u64,
}

pub struct OrderRouter {
    symbols: Arc<SymbolManager>,
    stats: RoutingStats,
}

impl OrderRouter {
    pub fn new(symbols: Arc<SymbolManager>) -> Self {
        Self { symbols, stats: RoutingStats::default() }
    }

    pub fn stats(&self) -> RoutingStats {
        self.stats
    }

    /// Validate and forward. On success the engine's MatchResult comes back
    /// (which can itself be REJECTED, e.g. on pool exhaustion); fills reach
    /// the gateway through the engine's fill callback.
    pub fn route_order(
        &mut self,
        engine: &mut MatchingEngine,
        req: &OrderRequest,
    ) -> Result<MatchResult, RejectReason> {
        self.stats.total_orders += 1;
        let order = match self.validate(req) {
            Ok(o) => o,
            Err(reason) => {
                self.stats.rejected_orders += 1;
                match reason {
                    RejectReason::UnknownSymbol => self.stats.unknown_symbol_orders += 1,
                    RejectReason::MarketClosed => self.stats.market_closed_orders += 1,
                    _ => {}
                }
                return Err(reason);
            }
        };
        let result = engine.process_order(order);
        if result.final_status == OrderStatus::Rejected {
            self.stats.rejected_orders += 1;
        } else {
            self.stats.routed_orders += 1;
        }
        Ok(result)
    }

    pub fn route_cancel(&mut self, engine: &mut MatchingEngine, cl_ord_id: u64) -> bool {
        engine.cancel_order(cl_ord_id)
    }

    pub fn route_replace(
        &mut self,
        engine: &mut MatchingEngine,
        old_cl_ord_id: u64,
        req: &OrderRequest,
    ) -> Result<MatchResult, RejectReason> {
        self.stats.total_orders += 1;
        let order = match self.validate(req) {
            Ok(o) => o,
            Err(reason) => {
                self.stats.rejected_orders += 1;
                return Err(reason);
            }
        };
        if engine.get_order(old_cl_ord_id).is_none() {
            self.stats.rejected_orders += 1;
            return Err(RejectReason::UnknownOrder);
        }
        let result = engine.replace_order(old_cl_ord_id, order);
        self.stats.routed_orders += 1;
        Ok(result)
    }

    fn validate(&self, req: &OrderRequest) -> Result<ClientOrder, RejectReason> {
        if req.symbol_name.is_empty() || req.cl_ord_id == 0 {
            return Err(RejectReason::MissingField);
        }
        if req.quantity == 0 {
            return Err(RejectReason::InvalidQuantity);
        }
        let sym = self.symbols.id_of(&req.symbol_name).ok_or(RejectReason::UnknownSymbol)?;
        if !self.symbols.can_trade(sym) {
            return Err(RejectReason::MarketClosed);
        }
        if !self.symbols.validate_quantity(sym, req.quantity) {
            return Err(RejectReason::InvalidQuantity);
        }
        let price = match req.ord_type {
            OrderType::Limit => {
                let px = req.price.ok_or(RejectReason::InvalidPrice)?;
                if !self.symbols.validate_price(sym, px) {
                    return Err(RejectReason::InvalidPrice);
                }
                px
            }
            OrderType::Market => 0,
        };
        Ok(ClientOrder {
            id: req.cl_ord_id,
            symbol: sym,
            side: req.side,
            ord_type: req.ord_type,
            tif: req.tif,
            price,
            quantity: req.quantity,
            filled: 0,
            status: OrderStatus::New,
            received_ns: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::BookParams;
    use crate::symman::{SymbolConfig, SymbolState};

    fn setup() -> (OrderRouter, MatchingEngine, Arc<SymbolManager>) {
        let symbols = Arc::new(SymbolManager::new());
        symbols.add_symbol(&SymbolConfig {
            name: "AAPL".to_string(),
            tick_size: 10,
            min_price: 41_000,
            max_price: 59_000,
            min_qty: 10,
            max_qty: 10_000,
            lot_size: 100,
            initial_state: SymbolState::Open,
        });
        let router = OrderRouter::new(symbols.clone());
        (router, MatchingEngine::new(BookParams::default()), symbols)
    }

    fn limit_req(id: u64, qty: u32, px: u32) -> OrderRequest {
        OrderRequest {
            cl_ord_id: id,
            symbol_name: "AAPL".to_string(),
            side: Side::Bid,
            ord_type: OrderType::Limit,
            tif: TimeInForce::Day,
            quantity: qty,
            price: Some(px),
        }
    }

    #[test]
    fn valid_order_rests() {
        let (mut r, mut e, _) = setup();
        let res = r.route_order(&mut e, &limit_req(1, 100, 49_900)).unwrap();
        assert_eq!(res.final_status, OrderStatus::New);
        assert_eq!(e.books().get(1).unwrap().best_bid(), 49_900);
        assert_eq!(r.stats().routed_orders, 1);
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let (mut r, mut e, _) = setup();
        let mut req = limit_req(1, 100, 49_900);
        req.symbol_name = "ZZZZ".to_string();
        assert_eq!(r.route_order(&mut e, &req), Err(RejectReason::UnknownSymbol));
        assert_eq!(r.stats().unknown_symbol_orders, 1);
    }

    #[test]
    fn halted_symbol_rejects_as_market_closed() {
        let (mut r, mut e, symbols) = setup();
        let id = symbols.id_of("AAPL").unwrap();
        symbols.halt(id);
        assert_eq!(r.route_order(&mut e, &limit_req(1, 100, 49_900)), Err(RejectReason::MarketClosed));
        assert_eq!(r.stats().market_closed_orders, 1);
    }

    #[test]
    fn quantity_bounds_and_zero() {
        let (mut r, mut e, _) = setup();
        assert_eq!(r.route_order(&mut e, &limit_req(1, 0, 49_900)), Err(RejectReason::InvalidQuantity));
        assert_eq!(
            r.route_order(&mut e, &limit_req(2, 99_999, 49_900)),
            Err(RejectReason::InvalidQuantity)
        );
    }

    #[test]
    fn limit_price_is_required_and_checked() {
        let (mut r, mut e, _) = setup();
        let mut req = limit_req(1, 100, 49_900);
        req.price = None;
        assert_eq!(r.route_order(&mut e, &req), Err(RejectReason::InvalidPrice));
        // Off the tick grid.
        assert_eq!(r.route_order(&mut e, &limit_req(2, 100, 49_905)), Err(RejectReason::InvalidPrice));
        // Outside the symbol band.
        assert_eq!(r.route_order(&mut e, &limit_req(3, 100, 60_000)), Err(RejectReason::InvalidPrice));
    }

    #[test]
    fn market_order_ignores_price_validation() {
        let (mut r, mut e, _) = setup();
        r.route_order(&mut e, &{
            let mut q = limit_req(1, 100, 49_900);
            q.side = Side::Ask;
            q
        })
        .unwrap();
        let req = OrderRequest {
            cl_ord_id: 2,
            symbol_name: "AAPL".to_string(),
            side: Side::Bid,
            ord_type: OrderType::Market,
            tif: TimeInForce::Ioc,
            quantity: 50,
            price: None,
        };
        let res = r.route_order(&mut e, &req).unwrap();
        assert_eq!(res.total_filled, 50);
    }

    #[test]
    fn replace_requires_known_order() {
        let (mut r, mut e, _) = setup();
        assert_eq!(
            r.route_replace(&mut e, 42, &limit_req(43, 100, 49_900)),
            Err(RejectReason::UnknownOrder)
        );
        r.route_order(&mut e, &limit_req(1, 100, 49_900)).unwrap();
        let res = r.route_replace(&mut e, 1, &limit_req(2, 50, 49_800)).unwrap();
        assert_eq!(res.final_status, OrderStatus::New);
        let book = e.books().get(1).unwrap();
        assert_eq!(book.best_bid(), 49_800);
        assert!(book.order(1).is_none());
    }

    #[test]
    fn missing_fields_are_rejected() {
        let (mut r, mut e, _) = setup();
        let mut req = limit_req(0, 100, 49_900);
        assert_eq!(r.route_order(&mut e, &req), Err(RejectReason::MissingField));
        req = limit_req(1, 100, 49_900);
        req.symbol_name = String::new();
        assert_eq!(r.route_order(&mut e, &req), Err(RejectReason::MissingField));
    }
}
