// src/symman.rs
//
// Symbol metadata and trading-state registry. Separate from the book
// registry: books hold liquidity, this holds the rules. Multiple readers /
// single writer via RwLock; the matching path only takes the read lock.

use crate::events::SymbolId;
use hashbrown::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolState {
    Inactive,
    PreOpen,
    Open,
    Halted,
    Closed,
    Suspended,
}

impl SymbolState {
    /// Orders are accepted in the pre-open auction phase and while open.
    #[inline]
    pub fn accepts_orders(self) -> bool {
        matches!(self, SymbolState::PreOpen | SymbolState::Open)
    }
}

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub id: SymbolId,
    pub name: String,
    pub state: SymbolState,
    pub tick_size: u32,
    pub min_price: u32,
    pub max_price: u32,
    pub min_qty: u32,
    pub max_qty: u32,
    pub lot_size: u32,
    pub created: SystemTime,
    pub updated: SystemTime,
    pub total_volume: u64,
    pub total_trades: u32,
}

/// Per-symbol startup configuration (the `[[symbols]]` config array).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SymbolConfig {
    pub name: String,
    #[serde(default = "default_tick")]
    pub tick_size: u32,
    #[serde(default = "default_min_price")]
    pub min_price: u32,
    #[serde(default = "default_max_price")]
    pub max_price: u32,
    #[serde(default = "default_min_qty")]
    pub min_qty: u32,
    #[serde(default = "default_max_qty")]
    pub max_qty: u32,
    #[serde(default = "default_lot")]
    pub lot_size: u32,
    #[serde(default = "default_state")]
    pub initial_state: SymbolState,
}

fn default_tick() -> u32 {
    1
}
fn default_min_price() -> u32 {
    1_000
}
fn default_max_price() -> u32 {
    999_999
}
fn default_min_qty() -> u32 {
    1
}
fn default_max_qty() -> u32 {
    1_000_000
}
fn default_lot() -> u32 {
    100
}
fn default_state() -> SymbolState {
    SymbolState::Inactive
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SymbolStats {
    pub total_symbols: u32,
    pub trading_symbols: u32,
    pub total_volume: u64,
    pub total_trades: u32,
}

struct Inner {
    name_to_id: HashMap<String, SymbolId>,
    symbols: HashMap<SymbolId, SymbolInfo>,
    next_id: u32,
}

pub struct SymbolManager {
    inner: RwLock<Inner>,
}

impl SymbolManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                name_to_id: HashMap::new(),
                symbols: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a symbol; idempotent on name (returns the existing id).
    /// Returns 0 once the id space is exhausted.
    pub fn add_symbol(&self, cfg: &SymbolConfig) -> SymbolId {
        let mut g = self.inner.write().unwrap();
        if let Some(&id) = g.name_to_id.get(&cfg.name) {
            return id;
        }
        if g.next_id > u32::from(u16::MAX) {
            return 0;
        }
        let id = g.next_id as SymbolId;
        g.next_id += 1;
        let now = SystemTime::now();
        let info = SymbolInfo {
            id,
            name: cfg.name.clone(),
            state: cfg.initial_state,
            tick_size: cfg.tick_size.max(1),
            min_price: cfg.min_price,
            max_price: cfg.max_price,
            min_qty: cfg.min_qty.max(1),
            max_qty: cfg.max_qty,
            lot_size: cfg.lot_size.max(1),
            created: now,
            updated: now,
            total_volume: 0,
            total_trades: 0,
        };
        g.name_to_id.insert(cfg.name.clone(), id);
        g.symbols.insert(id, info);
        id
    }

    /// Load a batch of symbols at startup; returns how many are registered.
    pub fn load_symbols(&self, configs: &[SymbolConfig]) -> usize {
        configs.iter().filter(|c| self.add_symbol(c) != 0).count()
    }

    pub fn remove_symbol(&self, id: SymbolId) -> bool {
        let mut g = self.inner.write().unwrap();
        match g.symbols.remove(&id) {
            Some(info) => {
                g.name_to_id.remove(&info.name);
                true
            }
            None => false,
        }
    }

    pub fn set_state(&self, id: SymbolId, state: SymbolState) -> bool {
        let mut g = self.inner.write().unwrap();
        match g.symbols.get_mut(&id) {
            Some(info) => {
                info.state = state;
                info.updated = SystemTime::now();
                true
            }
            None => false,
        }
    }

    pub fn open_trading(&self, id: SymbolId) -> bool {
        self.set_state(id, SymbolState::Open)
    }

    pub fn close_trading(&self, id: SymbolId) -> bool {
        self.set_state(id, SymbolState::Closed)
    }

    pub fn halt(&self, id: SymbolId) -> bool {
        self.set_state(id, SymbolState::Halted)
    }

    pub fn resume(&self, id: SymbolId) -> bool {
        self.set_state(id, SymbolState::Open)
    }

    pub fn id_of(&self, name: &str) -> Option<SymbolId> {
        self.inner.read().unwrap().name_to_id.get(name).copied()
    }

    pub fn info(&self, id: SymbolId) -> Option<SymbolInfo> {
        self.inner.read().unwrap().symbols.get(&id).cloned()
    }

    pub fn state(&self, id: SymbolId) -> Option<SymbolState> {
        self.inner.read().unwrap().symbols.get(&id).map(|i| i.state)
    }

    pub fn can_trade(&self, id: SymbolId) -> bool {
        self.state(id).map_or(false, SymbolState::accepts_orders)
    }

    /// Price is valid when inside the symbol's band and on a tick boundary.
    pub fn validate_price(&self, id: SymbolId, px: u32) -> bool {
        let g = self.inner.read().unwrap();
        match g.symbols.get(&id) {
            Some(i) => px >= i.min_price && px <= i.max_price && px % i.tick_size == 0,
            None => false,
        }
    }

    pub fn validate_quantity(&self, id: SymbolId, qty: u32) -> bool {
        let g = self.inner.read().unwrap();
        match g.symbols.get(&id) {
            Some(i) => qty >= i.min_qty && qty <= i.max_qty,
            None => false,
        }
    }

    /// Truncate toward zero onto the tick grid.
    pub fn round_to_tick(&self, id: SymbolId, px: u32) -> u32 {
        let g = self.inner.read().unwrap();
        match g.symbols.get(&id) {
            Some(i) => px - px % i.tick_size,
            None => px,
        }
    }

    /// Truncate toward zero onto the lot grid.
    pub fn round_to_lot(&self, id: SymbolId, qty: u32) -> u32 {
        let g = self.inner.read().unwrap();
        match g.symbols.get(&id) {
            Some(i) => qty - qty % i.lot_size,
            None => qty,
        }
    }

    pub fn update_symbol_stats(&self, id: SymbolId, volume: u32, is_trade: bool) {
        let mut g = self.inner.write().unwrap();
        if let Some(info) = g.symbols.get_mut(&id) {
            info.total_volume += u64::from(volume);
            if is_trade {
                info.total_trades += 1;
            }
            info.updated = SystemTime::now();
        }
    }

    /// Promote every pre-open symbol to open.
    pub fn open_market(&self) -> usize {
        let mut g = self.inner.write().unwrap();
        let now = SystemTime::now();
        let mut n = 0;
        for info in g.symbols.values_mut() {
            if info.state == SymbolState::PreOpen {
                info.state = SymbolState::Open;
                info.updated = now;
                n += 1;
            }
        }
        n
    }

    /// Close everything that is open or still in pre-open.
    pub fn close_market(&self) -> usize {
        let mut g = self.inner.write().unwrap();
        let now = SystemTime::now();
        let mut n = 0;
        for info in g.symbols.values_mut() {
            if matches!(info.state, SymbolState::Open | SymbolState::PreOpen) {
                info.state = SymbolState::Closed;
                info.updated = now;
                n += 1;
            }
        }
        n
    }

    pub fn stats(&self) -> SymbolStats {
        let g = self.inner.read().unwrap();
        let mut s = SymbolStats {
            total_symbols: g.symbols.len() as u32,
            ..SymbolStats::default()
        };
        for info in g.symbols.values() {
            if info.state == SymbolState::Open {
                s.trading_symbols += 1;
            }
            s.total_volume += info.total_volume;
            s.total_trades += info.total_trades;
        }
        s
    }
}

impl Default for SymbolManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str) -> SymbolConfig {
        SymbolConfig {
            name: name.to_string(),
            tick_size: 10,
            min_price: 10_000,
            max_price: 90_000,
            min_qty: 10,
            max_qty: 5_000,
            lot_size: 100,
            initial_state: SymbolState::PreOpen,
        }
    }

    #[test]
    fn add_is_idempotent_on_name() {
        let m = SymbolManager::new();
        let a = m.add_symbol(&cfg("AAPL"));
        let b = m.add_symbol(&cfg("AAPL"));
        assert_eq!(a, b);
        assert_eq!(m.id_of("AAPL"), Some(a));
        assert_eq!(m.stats().total_symbols, 1);
    }

    #[test]
    fn state_machine_and_can_trade() {
        let m = SymbolManager::new();
        let id = m.add_symbol(&cfg("AAPL"));
        assert!(m.can_trade(id)); // pre-open accepts orders
        assert!(m.halt(id));
        assert!(!m.can_trade(id));
        assert!(m.resume(id));
        assert_eq!(m.state(id), Some(SymbolState::Open));
        assert!(m.close_trading(id));
        assert!(!m.can_trade(id));
        assert!(!m.set_state(999, SymbolState::Open));
    }

    #[test]
    fn validation_and_rounding() {
        let m = SymbolManager::new();
        let id = m.add_symbol(&cfg("AAPL"));
        assert!(m.validate_price(id, 50_000));
        assert!(!m.validate_price(id, 50_005)); // off tick
        assert!(!m.validate_price(id, 9_990)); // below band
        assert!(m.validate_quantity(id, 100));
        assert!(!m.validate_quantity(id, 5));
        assert!(!m.validate_quantity(id, 9_999));
        assert_eq!(m.round_to_tick(id, 50_007), 50_000);
        assert_eq!(m.round_to_lot(id, 250), 200);
    }

    #[test]
    fn bulk_open_close() {
        let m = SymbolManager::new();
        m.load_symbols(&[cfg("AAPL"), cfg("MSFT")]);
        assert_eq!(m.open_market(), 2);
        assert_eq!(m.stats().trading_symbols, 2);
        assert_eq!(m.close_market(), 2);
        assert_eq!(m.stats().trading_symbols, 0);
    }

    #[test]
    fn stats_accumulate() {
        let m = SymbolManager::new();
        let id = m.add_symbol(&cfg("AAPL"));
        m.update_symbol_stats(id, 100, true);
        m.update_symbol_stats(id, 50, false);
        let info = m.info(id).unwrap();
        assert_eq!(info.total_volume, 150);
        assert_eq!(info.total_trades, 1);
    }
}
