// src/rx.rs
use crate::metrics;
use crate::pool::{PacketPool, Pkt};
use crate::util::{now_nanos, IdleBackoff, Shutdown};
use anyhow::Context;
use bytes::BufMut;
use crossbeam::queue::ArrayQueue;
use log::debug;
use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::sync::Arc;

/// Busy receive loop for one feed channel. Datagrams land in pooled
/// buffers and are pushed to the arbiter's queue; a full queue drops the
/// packet (the redundant feed covers the loss).
pub fn rx_loop(
    chan_name: &str,
    sock: &UdpSocket,
    q_out: Arc<ArrayQueue<Pkt>>,
    pool: Arc<PacketPool>,
    shutdown: Shutdown,
    spin_loops_per_yield: u32,
    rx_batch: usize,
) -> anyhow::Result<()> {
    let fd = sock.as_raw_fd();
    let chan_id = if chan_name == "A" { b'A' } else { b'B' };
    let mut dropped: u64 = 0;
    let mut backoff = IdleBackoff::new(spin_loops_per_yield);

    sock.set_nonblocking(true).context("set nonblocking")?;

    loop {
        if shutdown.is_tripped() {
            break;
        }

        let batch = rx_batch.max(1);
        let mut progressed = false;
        for _ in 0..batch {
            let mut buf = pool.checkout();
            let dst = unsafe {
                let s = buf.chunk_mut();
                std::slice::from_raw_parts_mut(s.as_mut_ptr(), s.len())
            };

            let n = unsafe { libc::recv(fd, dst.as_mut_ptr() as *mut libc::c_void, dst.len(), libc::MSG_DONTWAIT) };
            if n > 0 {
                let n = n as usize;
                unsafe {
                    buf.advance_mut(n);
                }
                match q_out.push(Pkt::new(buf, n, chan_id, now_nanos())) {
                    Ok(()) => metrics::inc_rx(chan_name, n),
                    Err(p) => {
                        pool.restore(p.buf);
                        dropped += 1;
                        metrics::inc_rx_drop(chan_name);
                        if dropped % 10_000 == 1 {
                            debug!("rx-{chan_name}: queue full, dropped={dropped}");
                        }
                    }
                }
                progressed = true;
            } else {
                pool.restore(buf);
                if n == 0 {
                    break;
                }
                let err = std::io::Error::last_os_error();
                let code = err.raw_os_error().unwrap_or(0);
                if code == libc::EAGAIN || code == libc::EWOULDBLOCK || code == libc::EINTR {
                    break;
                }
                return Err(anyhow::anyhow!("recv error on {chan_name}: {err}"));
            }
        }

        if progressed {
            backoff.reset();
        } else {
            backoff.idle();
        }
    }

    Ok(())
}
