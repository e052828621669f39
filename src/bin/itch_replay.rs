// src/bin/itch_replay.rs
//
// Generates a well-formed ITCH 5.0 order flow and transmits it to the two
// feed multicast groups. Optionally drops every Nth packet on channel A so
// the arbiter has real gaps to recover from channel B.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use zerocopy::AsBytes;

use itchmux::events::Side;
use itchmux::wire::{
    encode_add, encode_cancel, encode_delete, encode_directory, encode_execute, encode_replace,
    pad_symbol,
};

// xorshift64*; deterministic and dependency-free.
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

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 8 {
        eprintln!(
            "usage: itch_replay <group_a> <port_a> <group_b> <port_b> <iface_ipv4> <symbol> <messages> [rate_pps] [drop_a_every]"
        );
        std::process::exit(2);
    }
    let group_a: Ipv4Addr = args[1].parse()?;
    let port_a: u16 = args[2].parse()?;
    let group_b: Ipv4Addr = args[3].parse()?;
    let port_b: u16 = args[4].parse()?;
    let iface: Ipv4Addr = args[5].parse()?;
    let symbol = args[6].clone();
    let messages: u32 = args[7].parse()?;
    let rate_pps: u64 = args.get(8).and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let drop_a_every: u64 = args.get(9).and_then(|s| s.parse().ok()).unwrap_or(0);

    if messages >= u16::MAX as u32 {
        anyhow::bail!("messages must stay below {} (tracking number width)", u16::MAX);
    }

    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true).ok();
    sock.bind(&SocketAddr::new(IpAddr::V4(iface), 0).into())?;
    sock.set_multicast_ttl_v4(1)?;

    let dest_a = SocketAddr::new(IpAddr::V4(group_a), port_a);
    let dest_b = SocketAddr::new(IpAddr::V4(group_b), port_b);

    let stock = pad_symbol(&symbol);
    let mut rng = Rng(0x9e3779b97f4a7c15);
    let mut live: Vec<u64> = Vec::new();
    let mut next_order_id: u64 = 1;
    let mut tracking: u16 = 1;

    let nanos_per_pkt = if rate_pps == 0 { 0 } else { 1_000_000_000 / rate_pps };
    let start = Instant::now();
    let mut packets: u64 = 0;
    let mut sent_msgs: u32 = 0;
    let mut buf: Vec<u8> = Vec::with_capacity(1400);

    // Lead with the directory record so listeners intern the symbol.
    buf.extend_from_slice(encode_directory(tracking, stock, 100).as_bytes());
    tracking += 1;
    sent_msgs += 1;

    while sent_msgs < messages {
        // Pack a handful of messages per datagram.
        let per_packet = 1 + rng.below(8) as u32;
        for _ in 0..per_packet {
            if sent_msgs >= messages {
                break;
            }
            let roll = rng.below(100);
            if live.len() < 8 || roll < 55 {
                let side = if rng.below(2) == 0 { Side::Bid } else { Side::Ask };
                let px = match side {
                    Side::Bid => 49_000 + rng.below(900) as u32,
                    Side::Ask => 50_100 + rng.below(900) as u32,
                };
                let qty = 100 * (1 + rng.below(10) as u32);
                buf.extend_from_slice(encode_add(tracking, next_order_id, side, qty, stock, px).as_bytes());
                live.push(next_order_id);
                next_order_id += 1;
            } else {
                let at = rng.below(live.len() as u64) as usize;
                let id = live[at];
                match roll {
                    55..=69 => {
                        buf.extend_from_slice(
                            encode_execute(tracking, id, 100 * (1 + rng.below(3) as u32)).as_bytes(),
                        );
                    }
                    70..=79 => {
                        buf.extend_from_slice(encode_cancel(tracking, id, 100).as_bytes());
                    }
                    80..=89 => {
                        buf.extend_from_slice(encode_delete(tracking, id).as_bytes());
                        live.swap_remove(at);
                    }
                    _ => {
                        let new_id = next_order_id;
                        next_order_id += 1;
                        let px = 49_000 + rng.below(2_000) as u32;
                        let qty = 100 * (1 + rng.below(10) as u32);
                        buf.extend_from_slice(encode_replace(tracking, id, new_id, qty, px).as_bytes());
                        live[at] = new_id;
                    }
                }
            }
            tracking += 1;
            sent_msgs += 1;
        }

        packets += 1;
        let drop_a = drop_a_every > 0 && packets % drop_a_every == 0;
        if !drop_a {
            sock.send_to(&buf, &dest_a.into())?;
        }
        sock.send_to(&buf, &dest_b.into())?;
        buf.clear();

        if nanos_per_pkt > 0 {
            let target = start + Duration::from_nanos(packets * nanos_per_pkt);
            while Instant::now() < target {
                std::hint::spin_loop();
            }
        }
    }

    let elapsed = start.elapsed();
    println!(
        "sent {sent_msgs} messages in {packets} packets over {:.2}s ({:.0} msg/s)",
        elapsed.as_secs_f64(),
        sent_msgs as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
