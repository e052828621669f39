// src/util.rs
//
// Small runtime helpers shared by the pipeline threads: a cloneable
// shutdown handle, the idle-wait strategy for polling loops, the monotonic
// clock, and thread placement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop signal. Handles clone cheaply, so the ctrl-c hook and every
/// pipeline thread hold one directly instead of juggling Arc wrappers. Once
/// tripped it stays tripped.
#[derive(Clone, Default)]
pub struct Shutdown {
    tripped: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }
}

const YIELD_AFTER_IDLE_ROUNDS: u32 = 16;

/// Idle-wait strategy for the busy loops: burn short spin bursts while the
/// queues were recently active, hand the core back to the scheduler once a
/// dry streak builds up. `reset` on every productive iteration.
pub struct IdleBackoff {
    spins_per_round: u32,
    dry_rounds: u32,
}

impl IdleBackoff {
    pub fn new(spins_per_round: u32) -> Self {
        Self { spins_per_round: spins_per_round.max(1), dry_rounds: 0 }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.dry_rounds = 0;
    }

    #[inline]
    pub fn idle(&mut self) {
        self.dry_rounds = self.dry_rounds.saturating_add(1);
        if self.dry_rounds < YIELD_AFTER_IDLE_ROUNDS {
            for _ in 0..self.spins_per_round {
                std::hint::spin_loop();
            }
        } else {
            std::thread::yield_now();
        }
    }
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Monotonic nanoseconds for arrival stamps and stage timing. Reads the raw
/// monotonic clock on Linux; anywhere else (or if the clock call fails) it
/// falls back to a process-epoch Instant.
#[inline]
pub fn now_nanos() -> u64 {
    #[cfg(target_os = "linux")]
    {
        use nix::time::{clock_gettime, ClockId};
        if let Ok(ts) = clock_gettime(ClockId::CLOCK_MONOTONIC_RAW) {
            return ts.tv_sec() as u64 * NANOS_PER_SEC + ts.tv_nsec() as u64;
        }
    }
    process_epoch_ns()
}

fn process_epoch_ns() -> u64 {
    use once_cell::sync::Lazy;
    use std::time::Instant;
    static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
    EPOCH.elapsed().as_nanos() as u64
}

/// Pin the current thread when a core index is configured. Returns whether
/// the placement took effect.
pub fn pin_thread(core: Option<usize>) -> bool {
    let want = match core {
        Some(c) => c,
        None => return false,
    };
    core_affinity::get_core_ids()
        .and_then(|cores| cores.into_iter().find(|c| c.id == want))
        .map(core_affinity::set_for_current)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_latches_across_clones() {
        let s = Shutdown::new();
        let peer = s.clone();
        assert!(!peer.is_tripped());
        s.trip();
        assert!(peer.is_tripped());
        s.trip();
        assert!(s.is_tripped());
    }

    #[test]
    fn backoff_survives_long_dry_streaks() {
        let mut b = IdleBackoff::new(4);
        for _ in 0..100 {
            b.idle();
        }
        b.reset();
        b.idle();
    }

    #[test]
    fn now_nanos_is_monotonic() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
    }
}
