// src/decode.rs
//
// The feed worker: single thread that owns the arbiter, the symbol table,
// the books, and the matching engine. Drains the arbitrated message stream
// (decode -> apply -> publish) and the order-entry queue, per the
// one-thread-per-partition model.

use crate::apply::EventRouter;
use crate::arbiter::{Arbiter, ArbiterConfig};
use crate::book::BookParams;
use crate::engine::MatchingEngine;
use crate::latency::LatencyTracker;
use crate::metrics;
use crate::pool::{PacketPool, Pkt};
use crate::publish::MarketDataPublisher;
use crate::router::{OrderRequest, OrderRouter};
use crate::symman::{SymbolConfig, SymbolManager};
use crate::symtab::SymbolTable;
use crate::util::{now_nanos, IdleBackoff, Shutdown};
use crate::wire::{self, pad_symbol};
use crossbeam::queue::ArrayQueue;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct FeedParams {
    pub arbiter: ArbiterConfig,
    pub book: BookParams,
    pub l2_depth: usize,
    pub track_latency: bool,
    pub status_interval: Duration,
    pub spin_loops_per_yield: u32,
    /// Symbols registered at startup; interned here in manager-id order so
    /// the feed-side table assigns them the same dense ids.
    pub symbol_seed: Vec<SymbolConfig>,
}

/// Messages pulled from the arbiter per loop iteration before servicing
/// the order-entry queue.
const FEED_BATCH: usize = 64;

pub fn feed_loop(
    q_a: Arc<ArrayQueue<Pkt>>,
    q_b: Arc<ArrayQueue<Pkt>>,
    pool: Arc<PacketPool>,
    order_rx: Arc<ArrayQueue<OrderRequest>>,
    symbols: Arc<SymbolManager>,
    publisher: Arc<MarketDataPublisher>,
    params: FeedParams,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let mut symtab = SymbolTable::new();
    for s in &params.symbol_seed {
        symtab.get_or_intern(&pad_symbol(&s.name));
    }

    let mut engine = MatchingEngine::new(params.book);
    {
        let pb = publisher.clone();
        let sm = symbols.clone();
        engine.set_fill_callback(Box::new(move |fill| {
            pb.publish_trade(fill);
            sm.update_symbol_stats(fill.symbol, fill.quantity, true);
        }));
    }
    let mut router = OrderRouter::new(symbols);
    let mut applier = EventRouter::new();
    let mut arb = Arbiter::new(q_a, q_b, pool, params.arbiter);
    let mut latency = LatencyTracker::new(65_536);
    let mut backoff = IdleBackoff::new(params.spin_loops_per_yield);

    let mut messages: u64 = 0;
    let mut events: u64 = 0;
    let mut last_status = Instant::now();

    while !shutdown.is_tripped() {
        let mut moved = false;

        for _ in 0..FEED_BATCH {
            let touched = {
                let msg = match arb.next_message() {
                    Some(m) => m,
                    None => break,
                };
                messages += 1;
                metrics::inc_feed_messages();
                let t0 = if params.track_latency { now_nanos() } else { 0 };
                let decoded = wire::decode_one(msg, &mut symtab);
                let touched = decoded
                    .event
                    .and_then(|ev| applier.apply(&ev, engine.books_mut()));
                if params.track_latency {
                    let dt = now_nanos().saturating_sub(t0);
                    latency.record(dt);
                    metrics::observe_apply_latency_ns(dt);
                }
                touched
            };
            moved = true;
            if let Some(sym) = touched {
                events += 1;
                metrics::inc_feed_events();
                publisher.publish_level1_update(engine.get_level1_data(sym));
                let l2 = engine.get_level2_data(sym, params.l2_depth);
                publisher.publish_level2_update(&l2);
            }
        }

        while let Some(req) = order_rx.pop() {
            moved = true;
            match router.route_order(&mut engine, &req) {
                Ok(result) => {
                    debug!(
                        "order {} -> {:?} filled={}",
                        req.cl_ord_id, result.final_status, result.total_filled
                    );
                    let sym = result
                        .fills
                        .first()
                        .map(|f| f.symbol)
                        .or_else(|| engine.get_order(req.cl_ord_id).map(|o| o.symbol));
                    if let Some(sym) = sym {
                        publisher.publish_level1_update(engine.get_level1_data(sym));
                        let l2 = engine.get_level2_data(sym, params.l2_depth);
                        publisher.publish_level2_update(&l2);
                    }
                }
                Err(reason) => {
                    warn!("order {} rejected: {}", req.cl_ord_id, reason.as_str());
                }
            }
        }

        if last_status.elapsed() >= params.status_interval {
            metrics::set_arbiter_counters(arb.metrics());
            metrics::set_live_orders(engine.books().live_orders());
            metrics::set_index_dropped_inserts(engine.books().index_dropped_inserts());
            let ps = publisher.stats();
            metrics::set_publisher_counters(ps.total_messages, ps.dropped_messages, ps.subscribers);
            info!(
                "feed: msgs={} events={} live_orders={} next_seq={} gap={} dup_dropped={}",
                messages,
                events,
                engine.books().live_orders(),
                arb.expected(),
                arb.gap_len(),
                arb.metrics().dup_dropped
            );
            if params.track_latency {
                info!("{}", latency.report("decode+apply"));
            }
            last_status = Instant::now();
        }

        if moved {
            backoff.reset();
        } else {
            backoff.idle();
        }
    }

    info!("feed worker stopping; final books:\n{}", engine.books().dump());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{OrderType, TimeInForce};
    use crate::events::Side;
    use crate::publish::{
        MarketDataMessage, MarketDataSubscriber, MessageType, Payload, PublisherConfig,
    };
    use crate::symman::SymbolState;
    use crate::wire::encode_add;
    use std::sync::Mutex;
    use zerocopy::AsBytes;

    struct Sink {
        id: String,
        l1: Mutex<Vec<(u16, u32, u32)>>,
        trades: Mutex<Vec<(u32, u32)>>,
    }

    impl Sink {
        fn new() -> Arc<Self> {
            Arc::new(Sink {
                id: "sink".to_string(),
                l1: Mutex::new(Vec::new()),
                trades: Mutex::new(Vec::new()),
            })
        }
    }

    impl MarketDataSubscriber for Sink {
        fn on_market_data(&self, msg: &MarketDataMessage) {
            match &msg.payload {
                Payload::Level1(l1) => {
                    self.l1.lock().unwrap().push((l1.symbol, l1.bid_price, l1.ask_price))
                }
                Payload::Trade(t) => self.trades.lock().unwrap().push((t.price, t.quantity)),
                _ => {}
            }
        }

        fn subscriber_id(&self) -> &str {
            &self.id
        }
    }

    fn aapl() -> SymbolConfig {
        SymbolConfig {
            name: "AAPL".to_string(),
            tick_size: 1,
            min_price: 40_000,
            max_price: 60_000,
            min_qty: 1,
            max_qty: 1_000_000,
            lot_size: 100,
            initial_state: SymbolState::Open,
        }
    }

    fn pkt_of(msgs: &[&[u8]]) -> Pkt {
        let mut buf = bytes::BytesMut::new();
        for m in msgs {
            buf.extend_from_slice(m);
        }
        let len = buf.len();
        Pkt::new(buf, len, b'A', 0)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn packets_flow_through_to_level1_and_client_orders_trade() {
        let pool = Arc::new(PacketPool::with_capacity(64, 2048));
        let q_a: Arc<ArrayQueue<Pkt>> = Arc::new(ArrayQueue::new(64));
        let q_b: Arc<ArrayQueue<Pkt>> = Arc::new(ArrayQueue::new(64));
        let order_q: Arc<ArrayQueue<OrderRequest>> = Arc::new(ArrayQueue::new(16));

        let symbols = Arc::new(SymbolManager::new());
        symbols.add_symbol(&aapl());

        let publisher = Arc::new(MarketDataPublisher::new(PublisherConfig::default()));
        let sink = Sink::new();
        publisher.add_subscriber(sink.clone());
        publisher.subscribe("sink", 0, MessageType::Level1Update, 10, Duration::ZERO);
        publisher.subscribe("sink", 0, MessageType::TradeReport, 10, Duration::ZERO);
        publisher.start();

        let shutdown = Shutdown::new();
        let params = FeedParams {
            arbiter: ArbiterConfig::default(),
            book: BookParams::default(),
            l2_depth: 10,
            track_latency: false,
            status_interval: Duration::from_secs(60),
            spin_loops_per_yield: 8,
            symbol_seed: vec![aapl()],
        };
        let t = {
            let (q_a, q_b, pool) = (q_a.clone(), q_b.clone(), pool.clone());
            let (order_q, symbols, publisher) = (order_q.clone(), symbols.clone(), publisher.clone());
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                feed_loop(q_a, q_b, pool, order_q, symbols, publisher, params, shutdown)
            })
        };

        // Two resting feed orders via channel A.
        let bid = encode_add(1, 101, Side::Bid, 100, pad_symbol("AAPL"), 49_900);
        let ask = encode_add(2, 102, Side::Ask, 150, pad_symbol("AAPL"), 50_100);
        q_a.push(pkt_of(&[bid.as_bytes(), ask.as_bytes()])).unwrap();

        wait_for(|| sink.l1.lock().unwrap().len() >= 2);
        {
            let l1 = sink.l1.lock().unwrap();
            assert!(l1.len() >= 2, "no L1 updates delivered");
            let last = *l1.last().unwrap();
            assert_eq!(last, (1, 49_900, 50_100));
        }

        // A client market buy crosses the feed ask.
        order_q
            .push(OrderRequest {
                cl_ord_id: 7,
                symbol_name: "AAPL".to_string(),
                side: Side::Bid,
                ord_type: OrderType::Market,
                tif: TimeInForce::Ioc,
                quantity: 50,
                price: None,
            })
            .unwrap();

        wait_for(|| !sink.trades.lock().unwrap().is_empty());
        shutdown.trip();
        let _ = t.join().unwrap();
        publisher.stop();

        let trades = sink.trades.lock().unwrap();
        assert_eq!(trades.as_slice(), &[(50_100, 50)]);
    }
}

