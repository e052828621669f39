// src/main.rs
use crossbeam::queue::ArrayQueue;
use itchmux::config::AppConfig;
use itchmux::decode::{feed_loop, FeedParams};
use itchmux::pool::PacketPool;
use itchmux::publish::{ConsoleSubscriber, MarketDataPublisher, MessageType};
use itchmux::router::OrderRequest;
use itchmux::rx::rx_loop;
use itchmux::symman::{SymbolManager, SymbolState};
use itchmux::util::{pin_thread, Shutdown};
use itchmux::{metrics, net};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let cfg_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // Load config before the logger so the JSON formatting choice applies.
    let cfg = AppConfig::from_file(&cfg_path)?;

    if cfg.general.json_logs {
        let mut b = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        b.format(|buf, record| {
            use std::io::Write;
            let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            writeln!(
                buf,
                "{{\"ts\":\"{}\",\"level\":\"{}\",\"target\":\"{}\",\"msg\":\"{}\"}}",
                ts,
                record.level(),
                record.target(),
                record.args().to_string().replace('"', "'")
            )
        })
        .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("loaded config from {:?}", cfg_path);

    let shutdown = Shutdown::new();
    {
        let s = shutdown.clone();
        ctrlc::set_handler(move || {
            s.trip();
        })?;
    }

    let metrics_handle = cfg.metrics.as_ref().map(|m| metrics::spawn_http(m.bind.clone()));

    // Shared packet buffers and the two feed queues.
    let pool = Arc::new(PacketPool::with_capacity(cfg.general.pool_size, cfg.general.max_packet_size as usize));
    let q_a = Arc::new(ArrayQueue::new(cfg.general.rx_queue_capacity));
    let q_b = Arc::new(ArrayQueue::new(cfg.general.rx_queue_capacity));
    // Order-entry handoff; the session gateway pushes decoded requests here.
    let order_q: Arc<ArrayQueue<OrderRequest>> = Arc::new(ArrayQueue::new(4096));

    let sock_a = net::build_mcast_socket(&cfg.channels.a)?;
    let sock_b = net::build_mcast_socket(&cfg.channels.b)?;

    // Symbol universe.
    let symbols = Arc::new(SymbolManager::new());
    let registered = symbols.load_symbols(&cfg.symbols);
    info!("registered {} symbols", registered);

    // Market-data fan-out.
    let publisher = Arc::new(MarketDataPublisher::new(cfg.publisher_config()));
    let console = Arc::new(ConsoleSubscriber::new("console", true));
    publisher.add_subscriber(console);
    publisher.subscribe_all_symbols("console", MessageType::TradeReport);
    publisher.subscribe_all_symbols("console", MessageType::SymbolStatus);
    publisher.start();

    // Promote pre-open symbols into continuous trading.
    for s in &cfg.symbols {
        if s.initial_state == SymbolState::PreOpen {
            if let Some(id) = symbols.id_of(&s.name) {
                symbols.open_trading(id);
                publisher.publish_symbol_status(id, SymbolState::PreOpen, SymbolState::Open, "session open");
            }
        }
    }

    let t_rx_a = {
        let (q, pool, shutdown) = (q_a.clone(), pool.clone(), shutdown.clone());
        let (spin, batch, core) = (cfg.general.spin_loops_per_yield, cfg.general.rx_batch, cfg.cpu.a_rx_core);
        thread::Builder::new().name("rx-A".into()).spawn(move || {
            pin_thread(core);
            if let Err(e) = rx_loop("A", &sock_a, q, pool, shutdown, spin, batch) {
                error!("rx-A failed: {e:?}");
            }
        })?
    };

    let t_rx_b = {
        let (q, pool, shutdown) = (q_b.clone(), pool.clone(), shutdown.clone());
        let (spin, batch, core) = (cfg.general.spin_loops_per_yield, cfg.general.rx_batch, cfg.cpu.b_rx_core);
        thread::Builder::new().name("rx-B".into()).spawn(move || {
            pin_thread(core);
            if let Err(e) = rx_loop("B", &sock_b, q, pool, shutdown, spin, batch) {
                error!("rx-B failed: {e:?}");
            }
        })?
    };

    let t_feed = {
        let params = FeedParams {
            arbiter: cfg.arbiter_config(),
            book: cfg.book_params(),
            l2_depth: cfg.publisher.default_l2_depth as usize,
            track_latency: cfg.general.track_latency,
            status_interval: Duration::from_millis(cfg.general.status_interval_ms),
            spin_loops_per_yield: cfg.general.spin_loops_per_yield,
            symbol_seed: cfg.symbols.clone(),
        };
        let (pool, shutdown) = (pool.clone(), shutdown.clone());
        let (symbols, publisher) = (symbols.clone(), publisher.clone());
        let (order_q, core) = (order_q.clone(), cfg.cpu.feed_core);
        thread::Builder::new().name("feed".into()).spawn(move || {
            pin_thread(core);
            if let Err(e) = feed_loop(q_a, q_b, pool, order_q, symbols, publisher, params, shutdown) {
                error!("feed worker failed: {e:?}");
            }
        })?
    };

    if t_rx_a.join().is_err() {
        error!("rx-A thread panicked");
    }
    if t_rx_b.join().is_err() {
        error!("rx-B thread panicked");
    }
    if t_feed.join().is_err() {
        error!("feed thread panicked");
    }

    let closed = symbols.close_market();
    info!("closed {} symbols; routing stats available via metrics", closed);
    publisher.stop();

    if let Some(m) = &cfg.metrics {
        metrics::request_http_shutdown(&m.bind);
    }
    if let Some(h) = metrics_handle {
        let _ = h.join();
    }
    info!("clean shutdown");
    Ok(())
}
