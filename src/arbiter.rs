// src/arbiter.rs
//
// Merges the two redundant feed queues into one in-order, de-duplicated
// ITCH message stream. Packets are split into individual messages by the
// fixed per-tag sizes; ordering is by the header tracking number (widened
// to u64). Out-of-order messages wait in a bounded, TTL-pruned gap buffer
// of inline SmallMsg slots; in-order messages are served as views into the
// original packet buffer without copying.

use crate::events::SmallMsg;
use crate::pool::{PacketPool, Pkt};
use crate::wire::{message_size, tracking_number};
use crossbeam::queue::ArrayQueue;
use log::debug;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct ArbiterConfig {
    pub gap_capacity: usize,
    pub ttl: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        ArbiterConfig { gap_capacity: 65_536, ttl: Duration::from_millis(50) }
    }
}

/// Counters exposed to the metrics exporter. gap_detected/gap_filled count
/// gap episodes (a gap opening / a buffered run draining), the dropped_*
/// counters count individual messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArbiterMetrics {
    pub gap_detected: u64,
    pub gap_filled: u64,
    pub dup_dropped: u64,
    pub gap_dropped_ttl: u64,
    pub gap_dropped_capacity: u64,
    /// Packet tails discarded on an unknown tag or truncated message.
    pub malformed_dropped: u64,
}

struct GapEntry {
    msg: SmallMsg,
    at: Instant,
}

/// One feed's packet cursor. Holds the current packet until every message
/// in it has been consumed, then recycles the buffer into the pool.
struct FeedCursor {
    cur: Option<Pkt>,
    off: usize,
}

impl FeedCursor {
    fn new() -> Self {
        FeedCursor { cur: None, off: 0 }
    }

    /// Advance past exhausted or malformed packets and pull the next one
    /// from the queue until a valid head message is available.
    fn refill(&mut self, q: &ArrayQueue<Pkt>, pool: &PacketPool, malformed: &mut u64) {
        loop {
            if let Some(p) = &self.cur {
                if self.off < p.len {
                    let rest = &p.payload()[self.off..];
                    let msz = message_size(rest[0]) as usize;
                    if msz != 0 && msz <= rest.len() {
                        return;
                    }
                    // Unknown tag or truncated tail: drop the rest of the
                    // packet and move on.
                    *malformed += 1;
                    if *malformed % 1_000 == 1 {
                        debug!(
                            "malformed message tail (tag 0x{:02x}, {} bytes left), dropped={}",
                            rest[0],
                            rest.len(),
                            malformed
                        );
                    }
                }
                let p = self.cur.take().unwrap();
                pool.restore(p.buf);
                self.off = 0;
                continue;
            }
            match q.pop() {
                Some(p) => {
                    if p.len == 0 {
                        pool.restore(p.buf);
                        continue;
                    }
                    self.cur = Some(p);
                    self.off = 0;
                }
                None => return,
            }
        }
    }

    /// Tracking number of the head message, if one is staged.
    fn head_tracking(&self) -> Option<u64> {
        let p = self.cur.as_ref()?;
        if self.off >= p.len {
            return None;
        }
        let rest = &p.payload()[self.off..];
        let msz = message_size(rest[0]) as usize;
        if msz == 0 || msz > rest.len() {
            return None;
        }
        Some(tracking_number(&rest[..msz]))
    }

    /// Consume the head message, returning its (start, len) in the packet.
    fn consume(&mut self) -> (usize, usize) {
        let p = self.cur.as_ref().unwrap();
        let start = self.off;
        let msz = message_size(p.payload()[start]) as usize;
        self.off += msz;
        (start, msz)
    }

    #[inline]
    fn msg(&self, start: usize, len: usize) -> &[u8] {
        &self.cur.as_ref().unwrap().payload()[start..start + len]
    }
}

pub struct Arbiter {
    q_a: Arc<ArrayQueue<Pkt>>,
    q_b: Arc<ArrayQueue<Pkt>>,
    pool: Arc<PacketPool>,
    feed_a: FeedCursor,
    feed_b: FeedCursor,
    expected: u64,
    gap: BTreeMap<u64, GapEntry>,
    ready: VecDeque<SmallMsg>,
    staging: SmallMsg,
    gap_capacity: usize,
    ttl: Duration,
    metrics: ArbiterMetrics,
}

impl Arbiter {
    pub fn new(
        q_a: Arc<ArrayQueue<Pkt>>,
        q_b: Arc<ArrayQueue<Pkt>>,
        pool: Arc<PacketPool>,
        cfg: ArbiterConfig,
    ) -> Self {
        Self {
            q_a,
            q_b,
            pool,
            feed_a: FeedCursor::new(),
            feed_b: FeedCursor::new(),
            expected: 1,
            gap: BTreeMap::new(),
            ready: VecDeque::new(),
            staging: SmallMsg::default(),
            gap_capacity: cfg.gap_capacity.max(1),
            ttl: cfg.ttl,
            metrics: ArbiterMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ArbiterMetrics {
        &self.metrics
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn gap_len(&self) -> usize {
        self.gap.len()
    }

    /// Next in-order message, or None when nothing can be emitted right now
    /// (feeds empty, duplicate dropped, or out-of-order message buffered).
    /// The returned slice stays valid until the next call.
    pub fn next_message(&mut self) -> Option<&[u8]> {
        self.prune_expired();

        if let Some(m) = self.ready.pop_front() {
            self.staging = m;
            return Some(self.staging.as_slice());
        }

        self.feed_a.refill(&self.q_a, &self.pool, &mut self.metrics.malformed_dropped);
        self.feed_b.refill(&self.q_b, &self.pool, &mut self.metrics.malformed_dropped);

        let ta = self.feed_a.head_tracking();
        let tb = self.feed_b.head_tracking();
        let use_a = match (ta, tb) {
            (Some(a), Some(b)) => a <= b, // tie goes to A
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };

        let (start, len, n) = {
            let feed = if use_a { &mut self.feed_a } else { &mut self.feed_b };
            let (start, len) = feed.consume();
            let n = tracking_number(feed.msg(start, len));
            (start, len, n)
        };

        if n == 0 {
            // Unsequenced messages carry no ordering contract; pass through.
            let feed = if use_a { &self.feed_a } else { &self.feed_b };
            return Some(feed.msg(start, len));
        }
        if n < self.expected {
            self.metrics.dup_dropped += 1;
            return None;
        }
        if n > self.expected {
            if self.gap.contains_key(&n) {
                self.metrics.dup_dropped += 1;
                return None;
            }
            if self.gap.len() >= self.gap_capacity {
                self.gap.pop_first();
                self.metrics.gap_dropped_capacity += 1;
            }
            if self.gap.is_empty() {
                self.metrics.gap_detected += 1;
            }
            let copy = {
                let feed = if use_a { &self.feed_a } else { &self.feed_b };
                SmallMsg::copy_from(feed.msg(start, len))
            };
            self.gap.insert(n, GapEntry { msg: copy, at: Instant::now() });
            return None;
        }

        // In order: advance and drain any consecutive buffered messages.
        self.expected += 1;
        let mut drained = false;
        while let Some(entry) = self.gap.remove(&self.expected) {
            self.ready.push_back(entry.msg);
            self.expected += 1;
            drained = true;
        }
        if drained {
            self.metrics.gap_filled += 1;
        }
        let feed = if use_a { &self.feed_a } else { &self.feed_b };
        Some(feed.msg(start, len))
    }

    fn prune_expired(&mut self) {
        if self.gap.is_empty() {
            return;
        }
        let now = Instant::now();
        loop {
            let expired = match self.gap.iter().next() {
                Some((_, e)) => now.saturating_duration_since(e.at) > self.ttl,
                None => break,
            };
            if !expired {
                break;
            }
            self.gap.pop_first();
            self.metrics.gap_dropped_ttl += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Side;
    use crate::wire::{encode_add, encode_delete, pad_symbol};
    use zerocopy::AsBytes;

    fn harness(cfg: ArbiterConfig) -> (Arc<ArrayQueue<Pkt>>, Arc<ArrayQueue<Pkt>>, Arbiter) {
        let pool = Arc::new(PacketPool::with_capacity(64, 2048));
        let q_a = Arc::new(ArrayQueue::new(64));
        let q_b = Arc::new(ArrayQueue::new(64));
        let arb = Arbiter::new(q_a.clone(), q_b.clone(), pool, cfg);
        (q_a, q_b, arb)
    }

    fn pkt_of(msgs: &[&[u8]], chan: u8) -> Pkt {
        let mut buf = bytes::BytesMut::new();
        for m in msgs {
            buf.extend_from_slice(m);
        }
        let len = buf.len();
        Pkt::new(buf, len, chan, 0)
    }

    fn del(tracking: u16, id: u64) -> Vec<u8> {
        encode_delete(tracking, id).as_bytes().to_vec()
    }

    fn drain_trackings(arb: &mut Arbiter, spins: usize) -> Vec<u64> {
        let mut out = Vec::new();
        for _ in 0..spins {
            if let Some(m) = arb.next_message() {
                out.push(tracking_number(m));
            }
        }
        out
    }

    #[test]
    fn gap_is_buffered_and_filled_in_order() {
        let (q_a, q_b, mut arb) = harness(ArbiterConfig::default());
        let _ = q_a.push(pkt_of(&[&del(1, 10), &del(3, 30)], b'A'));
        let _ = q_b.push(pkt_of(&[&del(4, 40)], b'B'));
        let mut seqs = drain_trackings(&mut arb, 8);
        // 1 emitted; 3 and 4 buffered.
        assert_eq!(seqs, vec![1]);
        assert_eq!(arb.metrics().gap_detected, 1);
        assert_eq!(arb.gap_len(), 2);

        std::thread::sleep(Duration::from_millis(10));
        let _ = q_a.push(pkt_of(&[&del(2, 20)], b'A'));
        seqs.extend(drain_trackings(&mut arb, 8));
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(arb.metrics().gap_filled, 1);
        assert_eq!(arb.metrics().dup_dropped, 0);
        assert_eq!(arb.gap_len(), 0);
        assert_eq!(arb.expected(), 5);
    }

    #[test]
    fn duplicates_across_feeds_are_dropped() {
        let (q_a, q_b, mut arb) = harness(ArbiterConfig::default());
        let _ = q_a.push(pkt_of(&[&del(1, 10), &del(2, 20)], b'A'));
        let _ = q_b.push(pkt_of(&[&del(1, 10), &del(2, 20), &del(3, 30)], b'B'));
        let seqs = drain_trackings(&mut arb, 16);
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(arb.metrics().dup_dropped, 2);
    }

    #[test]
    fn output_is_strictly_monotonic() {
        let (q_a, q_b, mut arb) = harness(ArbiterConfig::default());
        let _ = q_a.push(pkt_of(&[&del(2, 2), &del(1, 1), &del(4, 4)], b'A'));
        let _ = q_b.push(pkt_of(&[&del(3, 3), &del(2, 2), &del(5, 5)], b'B'));
        let seqs = drain_trackings(&mut arb, 32);
        for w in seqs.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {seqs:?}");
        }
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn zero_tracking_passes_through() {
        let (q_a, _q_b, mut arb) = harness(ArbiterConfig::default());
        let add = encode_add(0, 99, Side::Bid, 10, pad_symbol("AAPL"), 50_000);
        let _ = q_a.push(pkt_of(&[add.as_bytes()], b'A'));
        let m = arb.next_message().expect("passthrough");
        assert_eq!(tracking_number(m), 0);
        assert_eq!(arb.expected(), 1);
    }

    #[test]
    fn ttl_expires_stale_gap_entries() {
        let cfg = ArbiterConfig { gap_capacity: 64, ttl: Duration::from_millis(5) };
        let (q_a, _q_b, mut arb) = harness(cfg);
        let _ = q_a.push(pkt_of(&[&del(1, 1), &del(3, 3)], b'A'));
        let _ = drain_trackings(&mut arb, 4);
        assert_eq!(arb.gap_len(), 1);
        std::thread::sleep(Duration::from_millis(10));
        let _ = arb.next_message();
        assert_eq!(arb.gap_len(), 0);
        assert_eq!(arb.metrics().gap_dropped_ttl, 1);
    }

    #[test]
    fn capacity_evicts_oldest_sequence() {
        let cfg = ArbiterConfig { gap_capacity: 2, ttl: Duration::from_secs(5) };
        let (q_a, _q_b, mut arb) = harness(cfg);
        let _ = q_a.push(pkt_of(&[&del(1, 1), &del(3, 3), &del(4, 4), &del(5, 5)], b'A'));
        let _ = drain_trackings(&mut arb, 8);
        assert_eq!(arb.gap_len(), 2);
        assert_eq!(arb.metrics().gap_dropped_capacity, 1);
        // Seq 3 was evicted to make room; 4 and 5 remain.
        let _ = q_a.push(pkt_of(&[&del(2, 2)], b'A'));
        let seqs = drain_trackings(&mut arb, 8);
        assert_eq!(seqs, vec![2]);
        // 3 is gone for good; feed stalls at expected == 3 until TTL/recovery.
        assert_eq!(arb.expected(), 3);
        assert_eq!(arb.gap_len(), 2);
    }

    #[test]
    fn malformed_tail_stops_the_packet() {
        let (q_a, _q_b, mut arb) = harness(ArbiterConfig::default());
        let mut msgs = del(1, 1);
        msgs.extend_from_slice(b"Zjunkjunk");
        let _ = q_a.push(pkt_of(&[&msgs], b'A'));
        let _ = q_a.push(pkt_of(&[&del(2, 2)], b'A'));
        let seqs = drain_trackings(&mut arb, 8);
        assert_eq!(seqs, vec![1, 2]);
    }
}
