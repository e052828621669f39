// src/bin/bench_book.rs
//
// Order-book mutation micro-benchmark: synthetic add/execute/cancel/delete
// flow against a single book, percentiles from the latency tracker.

use std::time::Instant;

use itchmux::book::{BookParams, OrderBook};
use itchmux::events::Side;
use itchmux::latency::LatencyTracker;

struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn parse_arg(args: &[String], idx: usize, default: usize) -> usize {
    args.get(idx).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let ops = parse_arg(&args, 1, 1_000_000);
    let warmup = parse_arg(&args, 2, 10_000);

    let mut book = OrderBook::new(&BookParams::default());
    let mut rng = Rng(0xdead_beef_cafe_f00d);
    let mut live: Vec<u64> = Vec::with_capacity(1 << 16);
    let mut next_id: u64 = 1;
    let mut tracker = LatencyTracker::new(1 << 20);

    let op = |book: &mut OrderBook, live: &mut Vec<u64>, rng: &mut Rng, next_id: &mut u64| {
        let roll = rng.below(100);
        if live.len() < 64 || roll < 50 {
            let side = if rng.below(2) == 0 { Side::Bid } else { Side::Ask };
            let px = match side {
                Side::Bid => 49_000 + rng.below(1_000) as u32,
                Side::Ask => 50_001 + rng.below(1_000) as u32,
            };
            let id = *next_id;
            *next_id += 1;
            if book.add(id, side, 100 + rng.below(900) as u32, px) {
                live.push(id);
            }
        } else {
            let at = rng.below(live.len() as u64) as usize;
            let id = live[at];
            match roll {
                50..=74 => {
                    book.execute(id, 100);
                    if book.order(id).is_none() {
                        live.swap_remove(at);
                    }
                }
                75..=89 => {
                    book.cancel(id, 50);
                    if book.order(id).is_none() {
                        live.swap_remove(at);
                    }
                }
                _ => {
                    book.delete(id);
                    live.swap_remove(at);
                }
            }
        }
    };

    for _ in 0..warmup {
        op(&mut book, &mut live, &mut rng, &mut next_id);
    }

    let started = Instant::now();
    for _ in 0..ops {
        let t0 = Instant::now();
        op(&mut book, &mut live, &mut rng, &mut next_id);
        tracker.record(t0.elapsed().as_nanos() as u64);
    }
    let elapsed = started.elapsed();

    println!(
        "{} ops in {:.3}s ({:.0} ops/s), live_orders={} best_bid={} best_ask={}",
        ops,
        elapsed.as_secs_f64(),
        ops as f64 / elapsed.as_secs_f64(),
        book.live_orders(),
        book.best_bid(),
        book.best_ask()
    );
    println!("{}", tracker.report("book_op"));
}
