// src/publish.rs
//
// Market-data publisher: translates book/fill activity into L1/L2/trade/
// status messages and fans them out to subscribers with per-subscription
// symbol filtering and throttling. Producers enqueue on a mutex-protected
// queue and signal a condvar; a single delivery thread drains it. Payloads
// are built by the owning worker thread (no cross-thread book access) and
// handed in ready-made.
//
// Locks are never held across subscriber callbacks: delivery decisions are
// made under the map lock, the callbacks run on a collected Arc list. A
// panicking subscriber is caught and logged; the others still get the
// message.

use crate::engine::{Fill, Level1Data, Level2Data};
use crate::events::{Side, SymbolId};
use crate::symman::SymbolState;
use crate::util::now_nanos;
use hashbrown::HashMap;
use log::{error, info};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Level1Update,
    Level2Update,
    TradeReport,
    SymbolStatus,
    SnapshotL1,
    SnapshotL2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Action {
    Add,
    Delete,
    Modify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2PriceLevel {
    pub price: u32,
    pub quantity: u64,
    pub order_count: u32,
    pub side: Side,
    pub action: L2Action,
}

#[derive(Debug, Clone)]
pub struct Level2Update {
    pub symbol: SymbolId,
    /// Bids best-first (price descending), then asks best-first (ascending).
    pub levels: Vec<L2PriceLevel>,
    pub is_snapshot: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TradeReport {
    pub symbol: SymbolId,
    pub trade_id: u64,
    pub price: u32,
    pub quantity: u32,
    pub aggressive_id: u64,
    pub passive_id: u64,
    pub aggressive_side: Side,
    pub exec_ns: u64,
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub symbol: SymbolId,
    pub old_state: SymbolState,
    pub new_state: SymbolState,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Level1(Level1Data),
    Level2(Level2Update),
    Trade(TradeReport),
    Status(StatusUpdate),
}

#[derive(Debug, Clone)]
pub struct MarketDataMessage {
    pub msg_type: MessageType,
    pub sequence: u64,
    pub ts_ns: u64,
    pub payload: Payload,
}

impl MarketDataMessage {
    pub fn symbol(&self) -> SymbolId {
        match &self.payload {
            Payload::Level1(l1) => l1.symbol,
            Payload::Level2(l2) => l2.symbol,
            Payload::Trade(t) => t.symbol,
            Payload::Status(s) => s.symbol,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    /// 0 subscribes to every symbol.
    pub symbol: SymbolId,
    pub msg_type: MessageType,
    pub enabled: bool,
    pub max_depth: u32,
    pub throttle: Duration,
    last_sent: Option<Instant>,
}

pub trait MarketDataSubscriber: Send + Sync {
    fn on_market_data(&self, msg: &MarketDataMessage);
    fn on_subscription_status(&self, _symbol: SymbolId, _msg_type: MessageType, _active: bool) {}
    fn subscriber_id(&self) -> &str;
}

struct SubscriberInfo {
    subscriber: Arc<dyn MarketDataSubscriber>,
    subscriptions: Vec<Subscription>,
    active: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PublisherConfig {
    pub max_queue_size: usize,
    pub default_l2_depth: u32,
    pub default_throttle: Duration,
    pub enable_level1: bool,
    pub enable_level2: bool,
    pub enable_trades: bool,
    pub enable_status: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            max_queue_size: 10_000,
            default_l2_depth: 10,
            default_throttle: Duration::from_millis(1),
            enable_level1: true,
            enable_level2: true,
            enable_trades: true,
            enable_status: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PublisherStats {
    pub total_messages: u64,
    pub level1_messages: u64,
    pub level2_messages: u64,
    pub trade_messages: u64,
    pub status_messages: u64,
    pub dropped_messages: u64,
    pub subscribers: usize,
}

struct Shared {
    subscribers: Mutex<HashMap<String, SubscriberInfo>>,
    queue: Mutex<VecDeque<MarketDataMessage>>,
    cv: Condvar,
    running: AtomicBool,
    sequence: AtomicU64,
    stats: Mutex<PublisherStats>,
    cfg: PublisherConfig,
}

pub struct MarketDataPublisher {
    shared: Arc<Shared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MarketDataPublisher {
    pub fn new(cfg: PublisherConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                cv: Condvar::new(),
                running: AtomicBool::new(false),
                sequence: AtomicU64::new(1),
                stats: Mutex::new(PublisherStats::default()),
                cfg,
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> PublisherConfig {
        self.shared.cfg
    }

    pub fn start(&self) -> bool {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("md-publisher".into())
            .spawn(move || delivery_loop(shared))
            .expect("spawn md-publisher");
        *self.handle.lock().unwrap() = Some(handle);
        true
    }

    /// Signals the delivery thread, lets it drain the queue, and joins.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.cv.notify_all();
        if let Some(h) = self.handle.lock().unwrap().take() {
            let _ = h.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    // ----------------------- subscriber management -----------------------

    pub fn add_subscriber(&self, subscriber: Arc<dyn MarketDataSubscriber>) -> bool {
        let id = subscriber.subscriber_id().to_string();
        let mut subs = self.shared.subscribers.lock().unwrap();
        if subs.contains_key(&id) {
            return false;
        }
        subs.insert(id, SubscriberInfo { subscriber, subscriptions: Vec::new(), active: true });
        self.shared.stats.lock().unwrap().subscribers = subs.len();
        true
    }

    pub fn remove_subscriber(&self, subscriber_id: &str) -> bool {
        let mut subs = self.shared.subscribers.lock().unwrap();
        let removed = subs.remove(subscriber_id).is_some();
        self.shared.stats.lock().unwrap().subscribers = subs.len();
        removed
    }

    /// Create or update a subscription. Updating resets depth/throttle but
    /// not the throttle clock.
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        symbol: SymbolId,
        msg_type: MessageType,
        max_depth: u32,
        throttle: Duration,
    ) -> bool {
        let notify = {
            let mut subs = self.shared.subscribers.lock().unwrap();
            let info = match subs.get_mut(subscriber_id) {
                Some(i) => i,
                None => return false,
            };
            if let Some(sub) = info
                .subscriptions
                .iter_mut()
                .find(|s| s.symbol == symbol && s.msg_type == msg_type)
            {
                sub.max_depth = max_depth;
                sub.throttle = throttle;
                sub.enabled = true;
            } else {
                info.subscriptions.push(Subscription {
                    symbol,
                    msg_type,
                    enabled: true,
                    max_depth,
                    throttle,
                    last_sent: None,
                });
            }
            info.subscriber.clone()
        };
        notify.on_subscription_status(symbol, msg_type, true);
        true
    }

    pub fn subscribe_all_symbols(&self, subscriber_id: &str, msg_type: MessageType) -> bool {
        self.subscribe(
            subscriber_id,
            0,
            msg_type,
            self.shared.cfg.default_l2_depth,
            self.shared.cfg.default_throttle,
        )
    }

    pub fn unsubscribe(&self, subscriber_id: &str, symbol: SymbolId, msg_type: MessageType) -> bool {
        let notify = {
            let mut subs = self.shared.subscribers.lock().unwrap();
            let info = match subs.get_mut(subscriber_id) {
                Some(i) => i,
                None => return false,
            };
            let before = info.subscriptions.len();
            info.subscriptions.retain(|s| !(s.symbol == symbol && s.msg_type == msg_type));
            if info.subscriptions.len() == before {
                return false;
            }
            info.subscriber.clone()
        };
        notify.on_subscription_status(symbol, msg_type, false);
        true
    }

    pub fn subscriptions(&self, subscriber_id: &str) -> Vec<Subscription> {
        self.shared
            .subscribers
            .lock()
            .unwrap()
            .get(subscriber_id)
            .map(|i| i.subscriptions.clone())
            .unwrap_or_default()
    }

    // --------------------------- publishing ------------------------------

    pub fn publish_level1_update(&self, l1: Level1Data) {
        if !self.shared.cfg.enable_level1 {
            return;
        }
        let msg = self.stamp(MessageType::Level1Update, Payload::Level1(l1));
        self.enqueue(msg);
    }

    pub fn publish_level2_update(&self, l2: &Level2Data) {
        if !self.shared.cfg.enable_level2 {
            return;
        }
        let update = build_level2(l2, false);
        let msg = self.stamp(MessageType::Level2Update, Payload::Level2(update));
        self.enqueue(msg);
    }

    pub fn publish_trade(&self, fill: &Fill) {
        if !self.shared.cfg.enable_trades {
            return;
        }
        let report = TradeReport {
            symbol: fill.symbol,
            trade_id: fill.trade_id,
            price: fill.price,
            quantity: fill.quantity,
            aggressive_id: fill.aggressive_id,
            passive_id: fill.passive_id,
            aggressive_side: fill.aggressive_side,
            exec_ns: fill.exec_ns,
        };
        let msg = self.stamp(MessageType::TradeReport, Payload::Trade(report));
        self.enqueue(msg);
    }

    pub fn publish_symbol_status(
        &self,
        symbol: SymbolId,
        old_state: SymbolState,
        new_state: SymbolState,
        reason: &str,
    ) {
        if !self.shared.cfg.enable_status {
            return;
        }
        let status = StatusUpdate { symbol, old_state, new_state, reason: reason.to_string() };
        let msg = self.stamp(MessageType::SymbolStatus, Payload::Status(status));
        self.enqueue(msg);
    }

    /// Synchronous direct delivery, bypassing the queue; used for recovery
    /// right after a subscription.
    pub fn send_level1_snapshot(&self, subscriber_id: &str, l1: Level1Data) {
        let msg = self.stamp(MessageType::SnapshotL1, Payload::Level1(l1));
        self.send_direct(subscriber_id, &msg);
    }

    pub fn send_level2_snapshot(&self, subscriber_id: &str, l2: &Level2Data, depth: usize) {
        let mut truncated = l2.clone();
        truncated.bids.truncate(depth);
        truncated.asks.truncate(depth);
        let update = build_level2(&truncated, true);
        let msg = self.stamp(MessageType::SnapshotL2, Payload::Level2(update));
        self.send_direct(subscriber_id, &msg);
    }

    pub fn stats(&self) -> PublisherStats {
        *self.shared.stats.lock().unwrap()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    // ---------------------------- internals ------------------------------

    fn stamp(&self, msg_type: MessageType, payload: Payload) -> MarketDataMessage {
        MarketDataMessage {
            msg_type,
            sequence: self.shared.sequence.fetch_add(1, Ordering::Relaxed),
            ts_ns: now_nanos(),
            payload,
        }
    }

    fn enqueue(&self, msg: MarketDataMessage) {
        {
            let mut q = self.shared.queue.lock().unwrap();
            if q.len() >= self.shared.cfg.max_queue_size {
                q.pop_front();
                self.shared.stats.lock().unwrap().dropped_messages += 1;
            }
            q.push_back(msg);
        }
        self.shared.cv.notify_one();
    }

    fn send_direct(&self, subscriber_id: &str, msg: &MarketDataMessage) {
        let target = {
            let subs = self.shared.subscribers.lock().unwrap();
            subs.get(subscriber_id).filter(|i| i.active).map(|i| i.subscriber.clone())
        };
        if let Some(t) = target {
            deliver_one(&t, msg);
        }
    }
}

impl Drop for MarketDataPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bids best-first then asks best-first; snapshots mark every level as an
/// add, incrementals as a modify.
fn build_level2(l2: &Level2Data, is_snapshot: bool) -> Level2Update {
    let action = if is_snapshot { L2Action::Add } else { L2Action::Modify };
    let mut levels = Vec::with_capacity(l2.bids.len() + l2.asks.len());
    for b in &l2.bids {
        levels.push(L2PriceLevel {
            price: b.price,
            quantity: b.quantity,
            order_count: b.order_count,
            side: Side::Bid,
            action,
        });
    }
    for a in &l2.asks {
        levels.push(L2PriceLevel {
            price: a.price,
            quantity: a.quantity,
            order_count: a.order_count,
            side: Side::Ask,
            action,
        });
    }
    Level2Update { symbol: l2.symbol, levels, is_snapshot }
}

fn delivery_loop(shared: Arc<Shared>) {
    let mut batch: Vec<MarketDataMessage> = Vec::new();
    loop {
        {
            let mut q = shared.queue.lock().unwrap();
            while q.is_empty() && shared.running.load(Ordering::SeqCst) {
                q = shared.cv.wait(q).unwrap();
            }
            batch.extend(q.drain(..));
        }
        if batch.is_empty() && !shared.running.load(Ordering::SeqCst) {
            return;
        }
        for msg in batch.drain(..) {
            deliver(&shared, &msg);
            update_stats(&shared, msg.msg_type);
        }
    }
}

fn deliver(shared: &Arc<Shared>, msg: &MarketDataMessage) {
    let now = Instant::now();
    let targets: Vec<Arc<dyn MarketDataSubscriber>> = {
        let mut subs = shared.subscribers.lock().unwrap();
        subs.values_mut()
            .filter(|info| info.active)
            .filter_map(|info| should_deliver(info, msg, now).then(|| info.subscriber.clone()))
            .collect()
    };
    for t in &targets {
        deliver_one(t, msg);
    }
}

fn deliver_one(target: &Arc<dyn MarketDataSubscriber>, msg: &MarketDataMessage) {
    let r = catch_unwind(AssertUnwindSafe(|| target.on_market_data(msg)));
    if r.is_err() {
        error!("subscriber {} panicked on message seq={}", target.subscriber_id(), msg.sequence);
    }
}

/// True when some enabled subscription matches the message's type and
/// symbol and is not throttled. Throttled skips do not touch `last_sent`.
fn should_deliver(info: &mut SubscriberInfo, msg: &MarketDataMessage, now: Instant) -> bool {
    let msg_symbol = msg.symbol();
    for sub in &mut info.subscriptions {
        if !sub.enabled || sub.msg_type != msg.msg_type {
            continue;
        }
        if sub.symbol != 0 && sub.symbol != msg_symbol {
            continue;
        }
        if !sub.throttle.is_zero() {
            if let Some(last) = sub.last_sent {
                if now.saturating_duration_since(last) < sub.throttle {
                    continue;
                }
            }
            sub.last_sent = Some(now);
        }
        return true;
    }
    false
}

fn update_stats(shared: &Arc<Shared>, msg_type: MessageType) {
    let mut s = shared.stats.lock().unwrap();
    s.total_messages += 1;
    match msg_type {
        MessageType::Level1Update | MessageType::SnapshotL1 => s.level1_messages += 1,
        MessageType::Level2Update | MessageType::SnapshotL2 => s.level2_messages += 1,
        MessageType::TradeReport => s.trade_messages += 1,
        MessageType::SymbolStatus => s.status_messages += 1,
    }
}

/// Trivial subscriber that logs top-of-book and trades; used by main and
/// the integration tests.
pub struct ConsoleSubscriber {
    id: String,
    verbose: bool,
}

impl ConsoleSubscriber {
    pub fn new(id: &str, verbose: bool) -> Self {
        Self { id: id.to_string(), verbose }
    }
}

impl MarketDataSubscriber for ConsoleSubscriber {
    fn on_market_data(&self, msg: &MarketDataMessage) {
        if !self.verbose {
            return;
        }
        match &msg.payload {
            Payload::Level1(l1) => info!(
                "[{}] L1 sym={} bid={}x{} ask={}x{}",
                self.id, l1.symbol, l1.bid_price, l1.bid_quantity, l1.ask_price, l1.ask_quantity
            ),
            Payload::Level2(l2) => {
                info!("[{}] L2 sym={} levels={} snapshot={}", self.id, l2.symbol, l2.levels.len(), l2.is_snapshot)
            }
            Payload::Trade(t) => info!(
                "[{}] TRADE sym={} px={} qty={} trade_id={}",
                self.id, t.symbol, t.price, t.quantity, t.trade_id
            ),
            Payload::Status(s) => info!(
                "[{}] STATUS sym={} {:?} -> {:?} ({})",
                self.id, s.symbol, s.old_state, s.new_state, s.reason
            ),
        }
    }

    fn subscriber_id(&self) -> &str {
        &self.id
    }
}
