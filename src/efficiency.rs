//! Lock-free EWMA of the compressed/original byte ratio, plus the retrain trigger (C4).
//!
//! The two running `f64`s are stored as `AtomicU64` bit patterns and updated through
//! compare-exchange loops, matching the "two 64-bit words bit-cast to double... updated via CAS"
//! note in the design notes: no mutex guards the hot observation path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn load_f64(word: &AtomicU64, order: Ordering) -> f64 {
    f64::from_bits(word.load(order))
}

fn cas_f64(word: &AtomicU64, mut current: f64, new: impl Fn(f64) -> f64) -> f64 {
    loop {
        let new_value = new(current);
        match word.compare_exchange_weak(
            current.to_bits(),
            new_value.to_bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return new_value,
            Err(observed) => current = f64::from_bits(observed),
        }
    }
}

/// Current wall-clock time in seconds since the epoch. The host supplies `now` to every public
/// method rather than this tracker reading the clock itself, so tests can drive time explicitly.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Lock-free EWMA tracker deciding when the trainer (C8) should retrain.
pub struct EfficiencyTracker {
    ewma_bits: AtomicU64,
    baseline_bits: AtomicU64,
    initialized: AtomicBool,
    bytes_since_retrain: AtomicU64,
    last_retrain_secs: AtomicU64,

    enabled: AtomicBool,
    interval_secs: AtomicU64,
    min_bytes: AtomicU64,
    alpha_bits: AtomicU64,
    drop_bits: AtomicU64,
}

impl Default for EfficiencyTracker {
    fn default() -> Self {
        Self {
            ewma_bits: AtomicU64::new(0f64.to_bits()),
            baseline_bits: AtomicU64::new(0f64.to_bits()),
            initialized: AtomicBool::new(false),
            bytes_since_retrain: AtomicU64::new(0),
            last_retrain_secs: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
            interval_secs: AtomicU64::new(3600),
            min_bytes: AtomicU64::new(0),
            alpha_bits: AtomicU64::new(0.2f64.to_bits()),
            drop_bits: AtomicU64::new(0.15f64.to_bits()),
        }
    }
}

impl EfficiencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-thread configuration call made before any reader observes the tracker concurrently.
    pub fn configure(&self, enabled: bool, interval_sec: u64, min_bytes: u64, alpha: f64, drop: f64) {
        self.enabled.store(enabled, Ordering::Relaxed);
        self.interval_secs.store(interval_sec, Ordering::Relaxed);
        self.min_bytes.store(min_bytes, Ordering::Relaxed);
        self.alpha_bits.store(alpha.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.drop_bits.store(drop.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Resets EWMA, baseline, and the initialized flag; records `now` as the last-retrain time.
    pub fn init(&self, now: u64) {
        self.ewma_bits.store(0f64.to_bits(), Ordering::Relaxed);
        self.baseline_bits.store(0f64.to_bits(), Ordering::Relaxed);
        self.initialized.store(false, Ordering::Release);
        self.bytes_since_retrain.store(0, Ordering::Relaxed);
        self.last_retrain_secs.store(now, Ordering::Relaxed);
    }

    /// Records one compression observation: `orig` input bytes compressed down to `comp` bytes.
    /// A no-op if `orig == 0`.
    pub fn on_observation(&self, orig: u64, comp: u64) {
        if orig == 0 {
            return;
        }
        self.bytes_since_retrain.fetch_add(orig, Ordering::Relaxed);
        let sample = comp as f64 / orig as f64;

        if !self.initialized.load(Ordering::Acquire) {
            self.ewma_bits.store(sample.to_bits(), Ordering::Release);
            self.baseline_bits.store(sample.to_bits(), Ordering::Release);
            self.initialized.store(true, Ordering::Release);
        } else {
            let alpha = load_f64(&self.alpha_bits, Ordering::Relaxed);
            let current = load_f64(&self.ewma_bits, Ordering::Acquire);
            cas_f64(&self.ewma_bits, current, |old| alpha * sample + (1.0 - alpha) * old);
        }
    }

    /// Decides whether the trainer should retrain now.
    #[must_use]
    pub fn should_retrain(&self, now: u64) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return false;
        }
        let last = self.last_retrain_secs.load(Ordering::Relaxed);
        let interval = self.interval_secs.load(Ordering::Relaxed);
        if now.saturating_sub(last) < interval {
            return false;
        }
        if self.bytes_since_retrain.load(Ordering::Relaxed) < self.min_bytes.load(Ordering::Relaxed) {
            return false;
        }

        let baseline = load_f64(&self.baseline_bits, Ordering::Acquire);
        if !self.initialized.load(Ordering::Acquire) || baseline <= 0.0 {
            return true;
        }

        let ewma = load_f64(&self.ewma_bits, Ordering::Acquire);
        let rel = ewma / baseline - 1.0;
        let drop = load_f64(&self.drop_bits, Ordering::Relaxed);
        rel <= -drop || rel >= drop
    }

    /// Marks a successful retrain: the baseline becomes `min(baseline, ewma)` (monotonically
    /// non-increasing), the byte counter resets, and `now` becomes the last-retrain time.
    pub fn mark_retrained(&self, now: u64) {
        let ewma = load_f64(&self.ewma_bits, Ordering::Acquire);
        if self.initialized.load(Ordering::Acquire) {
            let current = load_f64(&self.baseline_bits, Ordering::Acquire);
            cas_f64(&self.baseline_bits, current, |old| old.min(ewma));
        } else {
            self.baseline_bits.store(ewma.to_bits(), Ordering::Release);
        }
        self.bytes_since_retrain.store(0, Ordering::Relaxed);
        self.last_retrain_secs.store(now, Ordering::Relaxed);
    }

    #[must_use]
    pub fn ewma(&self) -> f64 {
        load_f64(&self.ewma_bits, Ordering::Acquire)
    }

    #[must_use]
    pub fn baseline(&self) -> f64 {
        load_f64(&self.baseline_bits, Ordering::Acquire)
    }

    #[must_use]
    pub fn last_retrain_secs(&self) -> u64 {
        self.last_retrain_secs.load(Ordering::Relaxed)
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests
