// src/net.rs
use crate::config::ChannelCfg;
use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Build a multicast receive socket for one feed channel: SO_REUSEADDR,
/// wildcard bind on the channel port, group join on the configured
/// interface, enlarged receive buffer, 50 ms receive timeout unless the
/// channel runs nonblocking busy-spin.
pub fn build_mcast_socket(cfg: &ChannelCfg) -> anyhow::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;

    sock.set_reuse_address(true).ok();

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cfg.port);
    sock.bind(&bind_addr.into()).context("bind")?;

    // Tolerate bursts while the consumer catches up.
    if cfg.recv_buffer_bytes > 0 {
        let _ = sock.set_recv_buffer_size(cfg.recv_buffer_bytes as usize);
    }

    sock.join_multicast_v4(&cfg.group, &cfg.iface_addr)
        .context("join_multicast_v4")?;

    let s: UdpSocket = sock.into();
    if cfg.nonblocking {
        s.set_nonblocking(true).ok();
    } else {
        s.set_read_timeout(Some(Duration::from_millis(50))).ok();
    }
    Ok(s)
}
