//! Bounded, time-windowed two-phase sampler that produces training corpora for the trainer (C8).
//!
//! Phase 1 (warmup) fills slots directly until either the item count or byte budget caps out.
//! Phase 2 (reservoir) switches to Algorithm R so that, over an unbounded stream, every item is
//! retained with probability `k/i`. `add` never blocks: on lock contention it silently drops the
//! sample, which the spec treats as an accepted trade-off, not a bug.

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

struct Slot {
    payload: Vec<u8>,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    max_items: usize,
    max_bytes: usize,
    seen: u64,
    stored: usize,
    bytes_used: usize,
    frozen: bool,
    start: Option<Instant>,
    rng: SmallRng,
}

/// A fixed-capacity, byte-budgeted, time-windowed sample reservoir.
pub struct Reservoir {
    inner: Mutex<Inner>,
    duration: Duration,
}

/// The samples pulled out of a reservoir session by [`Reservoir::snapshot`].
pub struct Snapshot {
    /// All sampled payloads, concatenated.
    pub flat: Vec<u8>,
    /// The length of each payload, in the same order they appear in `flat`.
    pub sizes: Vec<usize>,
    pub count: usize,
    pub total_bytes: usize,
}

impl Reservoir {
    /// Allocates a reservoir whose slot ceiling is `max_bytes / 100` (minimum 1). `duration_sec =
    /// 0` means the session never expires on its own (readiness is instead gated by `frozen` or a
    /// full slot array).
    #[must_use]
    pub fn new(max_bytes: usize, duration_sec: u64, seed: u64) -> Self {
        let max_items = (max_bytes / 100).max(1);
        Self {
            inner: Mutex::new(Inner {
                slots: (0..max_items).map(|_| None).collect(),
                max_items,
                max_bytes,
                seen: 0,
                stored: 0,
                bytes_used: 0,
                frozen: false,
                start: None,
                rng: SmallRng::seed_from_u64(seed),
            }),
            duration: Duration::from_secs(duration_sec),
        }
    }

    /// Begins a sampling session if one is not already active. Non-blocking: if the lock cannot
    /// be taken, the trainer will simply try again on its next iteration.
    pub fn check_start_session(&self) {
        if let Some(mut inner) = self.inner.try_lock() {
            if inner.start.is_none() {
                inner.start = Some(Instant::now());
                inner.seen = 0;
                inner.stored = 0;
                inner.bytes_used = 0;
                inner.frozen = false;
                for slot in &mut inner.slots {
                    *slot = None;
                }
            }
        }
    }

    /// `true` iff a session has started and, in duration mode, it has not yet expired.
    #[must_use]
    pub fn active(&self) -> bool {
        let inner = self.inner.lock();
        match inner.start {
            None => false,
            Some(start) => self.duration.is_zero() || start.elapsed() <= self.duration,
        }
    }

    /// `true` iff the reservoir holds at least one sample and the session is either frozen/full
    /// (unbounded duration) or has run its full window (bounded duration).
    #[must_use]
    pub fn ready(&self) -> bool {
        let inner = self.inner.lock();
        if inner.stored == 0 {
            return false;
        }
        match inner.start {
            None => false,
            Some(start) => {
                if self.duration.is_zero() {
                    inner.frozen || inner.stored >= inner.max_items
                } else {
                    start.elapsed() >= self.duration
                }
            },
        }
    }

    /// Offers a payload to the reservoir. Non-blocking: dropped on lock contention, on
    /// inactivity, or if `len > max_bytes`.
    pub fn add(&self, buf: &[u8]) {
        let Some(mut inner) = self.inner.try_lock() else { return };
        if inner.start.is_none() || buf.len() > inner.max_bytes {
            return;
        }
        if !self.duration.is_zero() {
            if let Some(start) = inner.start {
                if start.elapsed() > self.duration {
                    return;
                }
            }
        }

        inner.seen += 1;
        let i = inner.seen;

        if !inner.frozen {
            let fits_items = inner.stored < inner.max_items;
            let fits_bytes = inner.bytes_used + buf.len() <= inner.max_bytes;
            if fits_items && fits_bytes {
                let idx = inner.stored;
                inner.slots[idx] = Some(Slot { payload: buf.to_vec() });
                inner.stored += 1;
                inner.bytes_used += buf.len();
                return;
            }
            if inner.stored > 0 {
                inner.frozen = true;
            } else {
                // Nothing stored yet and this single item already doesn't fit; drop it and stay
                // in warmup for the next, possibly smaller, item.
                return;
            }
        }

        // Phase 2: Algorithm R with fixed k = stored.
        let k = inner.stored;
        if k == 0 {
            return;
        }
        let accept = inner.rng.random_range(0..i) < k as u64;
        if !accept {
            return;
        }
        let slot_idx = inner.rng.random_range(0..k);
        let old_len = inner.slots[slot_idx].as_ref().map_or(0, |s| s.payload.len());
        inner.slots[slot_idx] = Some(Slot { payload: buf.to_vec() });
        inner.bytes_used = (inner.bytes_used + buf.len()).saturating_sub(old_len);
    }

    /// Spin-acquires the lock, copies every stored payload out into one flat buffer plus a
    /// parallel size list, and resets the session. Returns `None` if nothing was stored.
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        let mut inner = loop {
            if let Some(guard) = self.inner.try_lock() {
                break guard;
            }
            std::hint::spin_loop();
        };

        if inner.stored == 0 {
            return None;
        }

        let mut flat = Vec::with_capacity(inner.bytes_used);
        let mut sizes = Vec::with_capacity(inner.stored);
        let mut total_bytes = 0usize;
        for slot in inner.slots.iter().take(inner.stored).flatten() {
            flat.extend_from_slice(&slot.payload);
            sizes.push(slot.payload.len());
            total_bytes += slot.payload.len();
        }
        let count = sizes.len();

        Self::reset_locked(&mut inner);

        Some(Snapshot { flat, sizes, count, total_bytes })
    }

    /// Frees every stored payload and clears session state, without taking a snapshot.
    pub fn reset_session(&self) {
        let mut inner = self.inner.lock();
        Self::reset_locked(&mut inner);
    }

    fn reset_locked(inner: &mut Inner) {
        for slot in &mut inner.slots {
            *slot = None;
        }
        inner.seen = 0;
        inner.stored = 0;
        inner.bytes_used = 0;
        inner.frozen = false;
        inner.start = None;
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_phase_fills_slots_in_order() {
        let r = Reservoir::new(1000, 0, 1);
        r.check_start_session();
        r.add(b"aaaa");
        r.add(b"bbbb");
        let snap = r.snapshot().expect("expected a snapshot");
        assert_eq!(snap.count, 2);
        assert_eq!(snap.sizes, vec![4, 4]);
    }

    #[test]
    fn not_ready_before_session_starts() {
        let r = Reservoir::new(1000, 0, 1);
        assert!(!r.ready());
        r.add(b"never stored, no session");
        assert!(!r.ready());
    }

    #[test]
    fn freezes_after_item_cap_then_accepts_via_algorithm_r() {
        // max_bytes / 100 = 1 slot ceiling when max_bytes = 100.
        let r = Reservoir::new(100, 0, 7);
        r.check_start_session();
        r.add(b"first"); // fills the single slot, stored=1
        assert!(r.ready());
        // Further adds exercise the reservoir-phase acceptance path without panicking.
        for n in 0..50 {
            r.add(format!("item-{n}").as_bytes());
        }
        let snap = r.snapshot().expect("expected a snapshot");
        assert_eq!(snap.count, 1);
    }

    #[test]
    fn drops_payloads_larger_than_budget() {
        let r = Reservoir::new(10, 0, 1);
        r.check_start_session();
        r.add(&vec![0u8; 100]);
        assert!(!r.ready());
    }

    #[test]
    fn snapshot_resets_session() {
        let r = Reservoir::new(1000, 0, 1);
        r.check_start_session();
        r.add(b"data");
        assert!(r.snapshot().is_some());
        assert!(!r.active());
        assert!(!r.ready());
    }

    #[test]
    fn duration_mode_not_ready_until_window_elapses() {
        let r = Reservoir::new(1000, 3600, 1);
        r.check_start_session();
        r.add(b"data");
        // Stored but the window (1 hour) has not elapsed yet.
        assert!(!r.ready());
        assert!(r.active());
    }
}
