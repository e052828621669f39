// src/pool.rs
//
// Pre-allocated datagram buffers shared by the listener threads (producers)
// and the arbiter (which hands drained buffers back). Every slot is filled
// up front, so the steady state never touches the allocator; when receivers
// momentarily outrun the consumer the pool falls back to fresh heap buffers
// and counts them. A growing `fallback_allocs` reading means the pool is
// undersized for the burst profile.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct PacketPool {
    shelf: ArrayQueue<BytesMut>,
    buf_capacity: usize,
    fallback_allocs: AtomicU64,
}

impl PacketPool {
    /// Builds the pool and fills every slot. Budget slots * buf_capacity
    /// bytes of resident memory.
    pub fn with_capacity(slots: usize, buf_capacity: usize) -> Self {
        let shelf = ArrayQueue::new(slots.max(1));
        while shelf.push(BytesMut::with_capacity(buf_capacity)).is_ok() {}
        Self { shelf, buf_capacity, fallback_allocs: AtomicU64::new(0) }
    }

    /// Take a cleared buffer, allocating (and counting) when the shelf is
    /// dry.
    #[inline]
    pub fn checkout(&self) -> BytesMut {
        if let Some(mut b) = self.shelf.pop() {
            b.clear();
            return b;
        }
        self.fallback_allocs.fetch_add(1, Ordering::Relaxed);
        BytesMut::with_capacity(self.buf_capacity)
    }

    /// Hand a drained buffer back. Buffers beyond the shelf capacity (the
    /// fallback allocations) just drop here.
    #[inline]
    pub fn restore(&self, mut buf: BytesMut) {
        buf.clear();
        let _ = self.shelf.push(buf);
    }

    pub fn idle_buffers(&self) -> usize {
        self.shelf.len()
    }

    pub fn fallback_allocs(&self) -> u64 {
        self.fallback_allocs.load(Ordering::Relaxed)
    }
}

/// One received datagram plus its receive context: valid length, feed
/// channel tag (b'A'/b'B'), and the monotonic receive timestamp.
#[derive(Debug)]
pub struct Pkt {
    pub buf: BytesMut,
    pub len: usize,
    pub chan: u8,
    pub recv_ns: u64,
}

impl Pkt {
    pub fn new(buf: BytesMut, len: usize, chan: u8, recv_ns: u64) -> Self {
        Pkt { buf, len, chan, recv_ns }
    }

    /// The valid datagram bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shelf_is_full_at_construction_and_recycles() {
        let pool = PacketPool::with_capacity(4, 128);
        assert_eq!(pool.idle_buffers(), 4);
        let mut b = pool.checkout();
        assert_eq!(pool.idle_buffers(), 3);
        b.extend_from_slice(b"payload");
        pool.restore(b);
        assert_eq!(pool.idle_buffers(), 4);
        // Restored buffers come back cleared.
        assert!(pool.checkout().is_empty());
        assert_eq!(pool.fallback_allocs(), 0);
    }

    #[test]
    fn dry_shelf_falls_back_to_the_allocator() {
        let pool = PacketPool::with_capacity(1, 64);
        let a = pool.checkout();
        let b = pool.checkout();
        assert_eq!(pool.fallback_allocs(), 1);
        pool.restore(a);
        pool.restore(b); // shelf full again; extra buffer drops
        assert_eq!(pool.idle_buffers(), 1);
    }

    #[test]
    fn pkt_payload_covers_valid_bytes_only() {
        let mut buf = BytesMut::with_capacity(64);
        buf.extend_from_slice(b"abcdef");
        let pkt = Pkt::new(buf, 4, b'A', 7);
        assert_eq!(pkt.payload(), b"abcd");
        assert_eq!((pkt.chan, pkt.recv_ns), (b'A', 7));
    }
}
