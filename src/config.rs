// src/config.rs
use crate::arbiter::ArbiterConfig;
use crate::book::BookParams;
use crate::publish::PublisherConfig;
use crate::symman::SymbolConfig;
use serde::Deserialize;
use std::time::Duration;
use std::{fs, net::Ipv4Addr, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: General,
    pub channels: Channels,
    #[serde(default)]
    pub arbiter: ArbiterCfg,
    #[serde(default)]
    pub book: BookCfg,
    #[serde(default)]
    pub publisher: PublisherCfg,
    #[serde(default)]
    pub cpu: Cpu,
    pub metrics: Option<Metrics>,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub max_packet_size: u32,     // e.g. 2048
    pub pool_size: usize,         // e.g. 65536
    pub rx_queue_capacity: usize, // e.g. 65536
    pub spin_loops_per_yield: u32,
    #[serde(default = "default_rx_batch")]
    pub rx_batch: usize,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub track_latency: bool, // per-event apply latency sampling
    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channels {
    pub a: ChannelCfg,
    pub b: ChannelCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelCfg {
    pub group: Ipv4Addr, // e.g. 239.10.10.1
    pub port: u16,
    pub iface_addr: Ipv4Addr, // local NIC IPv4 to join on
    pub recv_buffer_bytes: u32,
    #[serde(default)]
    pub nonblocking: bool, // busy-spin recv path
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbiterCfg {
    #[serde(default = "default_gap_capacity")]
    pub gap_capacity: usize,
    #[serde(default = "default_gap_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for ArbiterCfg {
    fn default() -> Self {
        ArbiterCfg { gap_capacity: default_gap_capacity(), ttl_ms: default_gap_ttl_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookCfg {
    #[serde(default = "default_p_min")]
    pub p_min: u32,
    #[serde(default = "default_p_max")]
    pub p_max: u32,
    #[serde(default = "default_hash_capacity")]
    pub hash_capacity: usize,
    #[serde(default = "default_probe_limit")]
    pub probe_limit: usize,
    #[serde(default = "default_order_pool_capacity")]
    pub order_pool_capacity: usize,
}

impl Default for BookCfg {
    fn default() -> Self {
        BookCfg {
            p_min: default_p_min(),
            p_max: default_p_max(),
            hash_capacity: default_hash_capacity(),
            probe_limit: default_probe_limit(),
            order_pool_capacity: default_order_pool_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherCfg {
    #[serde(default = "default_max_queue")]
    pub max_queue_size: usize,
    #[serde(default = "default_l2_depth")]
    pub default_l2_depth: u32,
    #[serde(default = "default_throttle_ms")]
    pub default_throttle_ms: u64,
    #[serde(default = "default_true")]
    pub enable_level1: bool,
    #[serde(default = "default_true")]
    pub enable_level2: bool,
    #[serde(default = "default_true")]
    pub enable_trades: bool,
    #[serde(default = "default_true")]
    pub enable_status: bool,
}

impl Default for PublisherCfg {
    fn default() -> Self {
        PublisherCfg {
            max_queue_size: default_max_queue(),
            default_l2_depth: default_l2_depth(),
            default_throttle_ms: default_throttle_ms(),
            enable_level1: true,
            enable_level2: true,
            enable_trades: true,
            enable_status: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cpu {
    pub a_rx_core: Option<usize>,
    pub b_rx_core: Option<usize>,
    pub feed_core: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metrics {
    /// Bind address for the Prometheus exporter (e.g. "0.0.0.0:9100").
    pub bind: String,
}

fn default_rx_batch() -> usize {
    16
}
fn default_status_interval() -> u64 {
    1_000
}
fn default_gap_capacity() -> usize {
    65_536
}
fn default_gap_ttl_ms() -> u64 {
    50
}
fn default_p_min() -> u32 {
    40_000
}
fn default_p_max() -> u32 {
    60_000
}
fn default_hash_capacity() -> usize {
    65_536
}
fn default_probe_limit() -> usize {
    64
}
fn default_order_pool_capacity() -> usize {
    1_000_000
}
fn default_max_queue() -> usize {
    10_000
}
fn default_l2_depth() -> u32 {
    10
}
fn default_throttle_ms() -> u64 {
    1
}
fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.channels.a.group.is_multicast() || !self.channels.b.group.is_multicast() {
            anyhow::bail!("channels.a.group and channels.b.group must be multicast IPv4 addresses");
        }
        if self.general.max_packet_size < 512 || self.general.max_packet_size > 65_535 {
            anyhow::bail!("general.max_packet_size must be in [512, 65535]");
        }
        if self.arbiter.gap_capacity == 0 {
            anyhow::bail!("arbiter.gap_capacity must be > 0");
        }
        if self.book.p_min == 0 || self.book.p_min >= self.book.p_max {
            anyhow::bail!("book price interval requires 0 < p_min < p_max");
        }
        if self.book.order_pool_capacity == 0 || self.book.hash_capacity == 0 {
            anyhow::bail!("book.order_pool_capacity and book.hash_capacity must be > 0");
        }
        for s in &self.symbols {
            if s.name.is_empty() || s.name.len() > 8 || !s.name.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
                anyhow::bail!("symbol name {:?} must be 1-8 chars of [A-Z0-9]", s.name);
            }
            if s.min_price > s.max_price {
                anyhow::bail!("symbol {:?}: min_price > max_price", s.name);
            }
        }
        Ok(())
    }

    pub fn book_params(&self) -> BookParams {
        BookParams {
            p_min: self.book.p_min,
            p_max: self.book.p_max,
            hash_capacity: self.book.hash_capacity,
            probe_limit: self.book.probe_limit,
            pool_capacity: self.book.order_pool_capacity,
        }
    }

    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig {
            gap_capacity: self.arbiter.gap_capacity,
            ttl: Duration::from_millis(self.arbiter.ttl_ms),
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            max_queue_size: self.publisher.max_queue_size,
            default_l2_depth: self.publisher.default_l2_depth,
            default_throttle: Duration::from_millis(self.publisher.default_throttle_ms),
            enable_level1: self.publisher.enable_level1,
            enable_level2: self.publisher.enable_level2,
            enable_trades: self.publisher.enable_trades,
            enable_status: self.publisher.enable_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [general]
        max_packet_size = 2048
        pool_size = 65536
        rx_queue_capacity = 65536
        spin_loops_per_yield = 64

        [channels.a]
        group = "239.10.10.1"
        port = 5001
        iface_addr = "0.0.0.0"
        recv_buffer_bytes = 8388608

        [channels.b]
        group = "239.10.10.2"
        port = 5002
        iface_addr = "0.0.0.0"
        recv_buffer_bytes = 8388608

        [[symbols]]
        name = "AAPL"
        tick_size = 1
        min_price = 40000
        max_price = 60000
        initial_state = "pre_open"
    "#;

    #[test]
    fn sample_parses_with_defaults() {
        let cfg: AppConfig = toml::from_str(SAMPLE).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.arbiter.gap_capacity, 65_536);
        assert_eq!(cfg.arbiter.ttl_ms, 50);
        assert_eq!(cfg.book.p_min, 40_000);
        assert_eq!(cfg.book.p_max, 60_000);
        assert_eq!(cfg.publisher.max_queue_size, 10_000);
        assert!(cfg.publisher.enable_level2);
        assert_eq!(cfg.general.rx_batch, 16);
        assert_eq!(cfg.symbols.len(), 1);
        assert_eq!(cfg.symbols[0].lot_size, 100);
    }

    #[test]
    fn non_multicast_group_is_rejected() {
        let bad = SAMPLE.replace("239.10.10.1", "10.0.0.1");
        let cfg: AppConfig = toml::from_str(&bad).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_symbol_name_is_rejected() {
        let bad = SAMPLE.replace("\"AAPL\"", "\"toolongname\"");
        let cfg: AppConfig = toml::from_str(&bad).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_price_interval_is_rejected() {
        let mut cfg: AppConfig = toml::from_str(SAMPLE).unwrap();
        cfg.book.p_min = 70_000;
        assert!(cfg.validate().is_err());
    }
}
