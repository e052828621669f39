// src/metrics.rs
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::net::ToSocketAddrs;
use std::thread;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static RX_PACKETS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(Opts::new("rx_packets", "Packets received per channel"), &["chan"])
        .expect("rx_packets");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static RX_BYTES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(Opts::new("rx_bytes", "Bytes received per channel"), &["chan"])
        .expect("rx_bytes");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static RX_DROPS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("rx_drops", "Packets dropped on backpressure per channel"),
        &["chan"],
    )
    .expect("rx_drops");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ARB_DUP_DROPPED: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("arbiter_dup_dropped", "Duplicate messages dropped by the arbiter")
        .expect("arbiter_dup_dropped");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static ARB_GAP_DETECTED: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("arbiter_gap_detected", "Gap episodes detected by the arbiter")
        .expect("arbiter_gap_detected");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static ARB_GAP_FILLED: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("arbiter_gap_filled", "Gap episodes filled from the buffer")
        .expect("arbiter_gap_filled");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static ARB_GAP_DROPPED_TTL: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("arbiter_gap_dropped_ttl", "Gap entries expired by TTL")
        .expect("arbiter_gap_dropped_ttl");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static ARB_GAP_DROPPED_CAPACITY: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("arbiter_gap_dropped_capacity", "Gap entries evicted at capacity")
        .expect("arbiter_gap_dropped_capacity");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static FEED_MESSAGES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("feed_messages", "Arbitrated messages consumed by the feed worker")
        .expect("feed_messages");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static FEED_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("feed_events", "Book events decoded and applied")
        .expect("feed_events");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static SYMBOL_TABLE_DROPS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("symbol_table_drops", "Events dropped because the symbol table is full")
        .expect("symbol_table_drops");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static INDEX_DROPPED_INSERTS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new(
        "index_dropped_inserts",
        "Order inserts dropped on hash probe exhaustion (resize the table)",
    )
    .expect("index_dropped_inserts");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static BOOK_LIVE_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("book_live_orders", "Live orders across all books")
        .expect("book_live_orders");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static PUB_MESSAGES: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("publisher_messages", "Market-data messages delivered")
        .expect("publisher_messages");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static PUB_DROPPED: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("publisher_dropped", "Market-data messages dropped on queue overflow")
        .expect("publisher_dropped");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static PUB_SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("publisher_subscribers", "Registered market-data subscribers")
        .expect("publisher_subscribers");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static APPLY_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    // Buckets in seconds: 100ns .. 100us.
    let buckets = vec![1e-7, 2e-7, 5e-7, 1e-6, 2e-6, 5e-6, 1e-5, 2e-5, 5e-5, 1e-4];
    let h = Histogram::with_opts(
        HistogramOpts::new("apply_latency_seconds", "Decode+apply latency per message").buckets(buckets),
    )
    .expect("apply_latency");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub fn inc_rx(chan: &str, bytes: usize) {
    RX_PACKETS.with_label_values(&[chan]).inc();
    RX_BYTES.with_label_values(&[chan]).inc_by(bytes as u64);
}

pub fn inc_rx_drop(chan: &str) {
    RX_DROPS.with_label_values(&[chan]).inc();
}

/// The arbiter keeps plain counters on its own thread; the feed worker
/// mirrors them into gauges at its status cadence.
pub fn set_arbiter_counters(m: &crate::arbiter::ArbiterMetrics) {
    ARB_DUP_DROPPED.set(m.dup_dropped as i64);
    ARB_GAP_DETECTED.set(m.gap_detected as i64);
    ARB_GAP_FILLED.set(m.gap_filled as i64);
    ARB_GAP_DROPPED_TTL.set(m.gap_dropped_ttl as i64);
    ARB_GAP_DROPPED_CAPACITY.set(m.gap_dropped_capacity as i64);
}

pub fn inc_feed_messages() {
    FEED_MESSAGES.inc();
}

pub fn inc_feed_events() {
    FEED_EVENTS.inc();
}

pub fn inc_symbol_table_drop() {
    SYMBOL_TABLE_DROPS.inc();
}

pub fn set_index_dropped_inserts(n: u64) {
    INDEX_DROPPED_INSERTS.set(n as i64);
}

pub fn set_live_orders(n: usize) {
    BOOK_LIVE_ORDERS.set(n as i64);
}

pub fn set_publisher_counters(delivered: u64, dropped: u64, subscribers: usize) {
    PUB_MESSAGES.set(delivered as i64);
    PUB_DROPPED.set(dropped as i64);
    PUB_SUBSCRIBERS.set(subscribers as i64);
}

pub fn observe_apply_latency_ns(ns: u64) {
    APPLY_LATENCY.observe((ns as f64) / 1_000_000_000.0);
}

pub fn spawn_http<A: ToSocketAddrs + Send + 'static>(addr: A) -> thread::JoinHandle<()> {
    let addr_string = addr
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "0.0.0.0:9100".to_string());

    thread::spawn(move || {
        let server = tiny_http::Server::http(&addr_string).expect("start metrics http");
        log::info!("prometheus metrics listening on http://{addr_string}/metrics");
        let encoder = TextEncoder::new();
        loop {
            if let Ok(req) = server.recv() {
                let url = req.url().to_string();
                if url == "/metrics" {
                    let metric_families = REGISTRY.gather();
                    let mut buf = Vec::with_capacity(16 * 1024);
                    encoder.encode(&metric_families, &mut buf).ok();
                    let resp = tiny_http::Response::from_data(buf)
                        .with_status_code(200)
                        .with_header(
                            tiny_http::Header::from_bytes(
                                &b"Content-Type"[..],
                                &b"text/plain; version=0.0.4"[..],
                            )
                            .unwrap(),
                        );
                    let _ = req.respond(resp);
                } else if url == "/live" || url == "/healthz" {
                    let _ = req.respond(tiny_http::Response::from_string("OK").with_status_code(200));
                } else if url == "/ready" {
                    let _ = req.respond(tiny_http::Response::from_string("READY").with_status_code(200));
                } else if url == "/shutdown" {
                    let _ = req.respond(tiny_http::Response::from_string("BYE").with_status_code(200));
                    break;
                } else {
                    let _ = req.respond(tiny_http::Response::empty(404));
                }
            }
        }
    })
}

/// Poke /shutdown so the exporter thread exits and can be joined.
pub fn request_http_shutdown(addr: &str) {
    use std::io::Write;
    if let Ok(mut s) = std::net::TcpStream::connect(addr) {
        let _ = s.write_all(b"GET /shutdown HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        let _ = s.flush();
    }
}
