// src/latency.rs
//
// Bounded-ring nanosecond sample store with percentile extraction. One
// tracker per measured stage; not thread safe. Kept off the per-event hot
// path unless explicitly enabled.

#[derive(Debug)]
pub struct LatencyTracker {
    samples: Vec<u64>,
    capacity: usize,
    count: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: usize,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: u64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: Vec::with_capacity(capacity), capacity, count: 0 }
    }

    /// When the ring is full, new samples overwrite the oldest.
    #[inline]
    pub fn record(&mut self, latency_ns: u64) {
        if self.samples.len() < self.capacity {
            self.samples.push(latency_ns);
        } else {
            self.samples[self.count % self.capacity] = latency_ns;
        }
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Copies and sorts the window; not for the hot path.
    pub fn stats(&self) -> LatencyStats {
        if self.samples.is_empty() {
            return LatencyStats::default();
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let n = sorted.len();
        let total: u64 = sorted.iter().sum();
        LatencyStats {
            count: n,
            min_ns: sorted[0],
            max_ns: sorted[n - 1],
            mean_ns: total / n as u64,
            p50_ns: sorted[n * 50 / 100],
            p95_ns: sorted[(n * 95 / 100).min(n - 1)],
            p99_ns: sorted[(n * 99 / 100).min(n - 1)],
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.count = 0;
    }

    /// One-line render for periodic logs and the bench tools.
    pub fn report(&self, name: &str) -> String {
        let s = self.stats();
        if s.count == 0 {
            return format!("{name}: no samples");
        }
        format!(
            "{name}: n={} min={}ns p50={}ns p95={}ns p99={}ns max={}ns mean={}ns",
            s.count, s.min_ns, s.p50_ns, s.p95_ns, s.p99_ns, s.max_ns, s.mean_ns
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_reports_zeroes() {
        let t = LatencyTracker::new(16);
        assert_eq!(t.stats(), LatencyStats::default());
        assert!(t.report("x").contains("no samples"));
    }

    #[test]
    fn percentiles_over_a_known_window() {
        let mut t = LatencyTracker::new(1000);
        for v in 1..=100u64 {
            t.record(v);
        }
        let s = t.stats();
        assert_eq!(s.count, 100);
        assert_eq!(s.min_ns, 1);
        assert_eq!(s.max_ns, 100);
        assert_eq!(s.p50_ns, 51);
        assert_eq!(s.p95_ns, 96);
        assert_eq!(s.p99_ns, 100);
        assert_eq!(s.mean_ns, 50);
    }

    #[test]
    fn ring_overwrites_oldest_when_full() {
        let mut t = LatencyTracker::new(4);
        for v in [10, 20, 30, 40, 50, 60] {
            t.record(v);
        }
        assert_eq!(t.len(), 4);
        let s = t.stats();
        // 50 and 60 overwrote 10 and 20.
        assert_eq!(s.min_ns, 30);
        assert_eq!(s.max_ns, 60);
    }
}
