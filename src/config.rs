//! Typed configuration surface. Every field here corresponds to one of the enumerated
//! configuration keys the host is responsible for parsing out of its own configuration format
//! (see the crate-level docs): this module only defines the validated target of that parse, it
//! does not read any file.

use crate::error::Error;
use std::path::PathBuf;

// -------------------------------------------------------------------------------------------------
//
/// Which `zstd` dictionary trainer backend the trainer (C8) uses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TrainMode {
    /// A single-shot, fast trainer. Good default for most workloads.
    #[default]
    Fast,

    /// A parameter-searching (COVER) trainer. Slower, single-threaded, can find a better
    /// dictionary at a given target compression level.
    Optimize,
}

// -------------------------------------------------------------------------------------------------
//
/// Compression and size-gating settings (`enable_comp`, `enable_dict`, `zstd_level`,
/// `min_comp_size`, `max_comp_size`).
#[derive(Clone, Debug)]
pub struct CompressionConfig {
    /// Master switch for the whole compression path. When false, `Engine::encode` always returns
    /// the raw sentinel.
    pub enable_comp: bool,

    /// Whether dictionaries may be selected at all. When false, encode always uses dictionary id
    /// 0 (compressed without a dictionary) rather than a namespace-matched dictionary.
    pub enable_dict: bool,

    /// Directory scanned for `<uuid>.dict` / `<uuid>.mf` pairs.
    pub dict_dir: PathBuf,

    /// Default/suggested dictionary size budget used by the trainer (C8), not the codec itself.
    pub dict_size: usize,

    /// `1..=22`, or `0` to mean "use the default of 3".
    pub zstd_level: i32,

    /// Values shorter than this are stored raw; no codec work occurs.
    pub min_comp_size: usize,

    /// Values longer than this are stored raw; no codec work occurs. Hard safety cap of 256 KiB.
    pub max_comp_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enable_comp: true,
            enable_dict: true,
            dict_dir: PathBuf::from("dictionaries"),
            dict_size: 112 * 1024,
            zstd_level: 0,
            min_comp_size: 64,
            max_comp_size: 256 * 1024,
        }
    }
}

impl CompressionConfig {
    /// The zstd level actually handed to the codec: `zstd_level`, or 3 if it is 0.
    #[must_use]
    pub fn effective_level(&self) -> i32 {
        if self.zstd_level == 0 { 3 } else { self.zstd_level }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.zstd_level != 0 && !(1..=22).contains(&self.zstd_level) {
            return Err(Error::invalid(format!(
                "zstd_level must be 0 or in 1..=22, got {}",
                self.zstd_level
            )));
        }
        if self.max_comp_size > 256 * 1024 {
            return Err(Error::invalid(format!(
                "max_comp_size of {} exceeds the 256 KiB safety cap",
                self.max_comp_size
            )));
        }
        if self.min_comp_size > self.max_comp_size {
            return Err(Error::invalid("min_comp_size must not exceed max_comp_size"));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
//
/// Trainer settings (`enable_training`, `retraining_interval_s`, `min_training_size`,
/// `ewma_alpha`, `retrain_drop`, `train_mode`, `training_window_duration_s`).
#[derive(Clone, Debug)]
pub struct TrainingConfig {
    /// Whether the background trainer loop (C8) runs at all.
    pub enable_training: bool,

    /// Minimum wall-clock seconds between retrains, passed to the efficiency tracker.
    pub retraining_interval_s: u64,

    /// Minimum bytes observed since the last retrain before another retrain is considered.
    pub min_training_size: u64,

    /// EWMA smoothing factor in `0..=1`.
    pub ewma_alpha: f64,

    /// Relative EWMA/baseline drift, in `0..=1`, that triggers a retrain.
    pub retrain_drop: f64,

    /// `FAST` or `OPTIMIZE` dictionary training backend.
    pub train_mode: TrainMode,

    /// How long a sampling session runs before the reservoir is considered `ready` in duration
    /// mode. `0` means unbounded (frozen/slots-full gates readiness instead).
    pub training_window_duration_s: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            enable_training: true,
            retraining_interval_s: 3600,
            min_training_size: 16 * 1024 * 1024,
            ewma_alpha: 0.2,
            retrain_drop: 0.15,
            train_mode: TrainMode::Fast,
            training_window_duration_s: 300,
        }
    }
}

impl TrainingConfig {
    fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.ewma_alpha) {
            return Err(Error::invalid("ewma_alpha must be in 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.retrain_drop) {
            return Err(Error::invalid("retrain_drop must be in 0..=1"));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
//
/// Garbage-collection settings (`gc_cool_period_s`, `gc_quarantine_period_s`, `dict_retain_max`).
#[derive(Clone, Debug)]
pub struct GcConfig {
    /// Seconds a retired table waits in the GC queue before reclamation, to let in-flight readers
    /// finish.
    pub gc_cool_period_s: u64,

    /// Seconds after retirement during which an id must not be reassigned.
    pub gc_quarantine_period_s: u64,

    /// Maximum active dictionaries retained per namespace, `1..=256`.
    pub dict_retain_max: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { gc_cool_period_s: 30, gc_quarantine_period_s: 60, dict_retain_max: 4 }
    }
}

impl GcConfig {
    fn validate(&self) -> Result<(), Error> {
        if !(1..=256).contains(&self.dict_retain_max) {
            return Err(Error::invalid("dict_retain_max must be in 1..=256"));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
//
/// Sampling settings (`enable_sampling`, `sample_p`, `sample_window_duration_s`, `spool_dir`,
/// `spool_max_bytes`).
#[derive(Clone, Debug)]
pub struct SamplingConfig {
    /// Whether the trainer's sampling hook (`trainer::sample`) ever forwards bytes to the
    /// reservoir.
    pub enable_sampling: bool,

    /// Acceptance probability in `(0, 1]` applied before a candidate reaches the probe.
    pub sample_p: f64,

    /// Duration, in seconds, of a reservoir sampling session. `0` means unbounded.
    pub sample_window_duration_s: u64,

    /// Byte budget for the reservoir; slot ceiling is `max_bytes / 100` (minimum 1).
    pub spool_max_bytes: usize,

    /// Scratch directory for any spooled sample overflow the host wants to keep on disk. Not
    /// written to by this crate directly; carried through for host bookkeeping.
    pub spool_dir: PathBuf,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enable_sampling: true,
            sample_p: 0.01,
            sample_window_duration_s: 300,
            spool_max_bytes: 64 * 1024 * 1024,
            spool_dir: PathBuf::from("spool"),
        }
    }
}

impl SamplingConfig {
    fn validate(&self) -> Result<(), Error> {
        if !(self.sample_p > 0.0 && self.sample_p <= 1.0) {
            return Err(Error::invalid("sample_p must be in (0, 1]"));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
//
/// Async command dispatch settings (`async_cmd_enabled`, `async_thread_pool_size`,
/// `async_queue_size`). Consumed by the host's worker pool wiring (C10); this crate only carries
/// the typed values through.
#[derive(Clone, Debug)]
pub struct AsyncDispatchConfig {
    pub async_cmd_enabled: bool,
    pub async_thread_pool_size: usize,
    pub async_queue_size: usize,
}

impl Default for AsyncDispatchConfig {
    fn default() -> Self {
        Self { async_cmd_enabled: false, async_thread_pool_size: 4, async_queue_size: 1024 }
    }
}

// -------------------------------------------------------------------------------------------------
//
/// Command-rewriting front-end filter toggles (`enable_string_filter`, `enable_hash_filter`).
/// These gate a host collaborator outside this crate's scope; carried through unvalidated.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterConfig {
    pub enable_string_filter: bool,
    pub enable_hash_filter: bool,
}

// -------------------------------------------------------------------------------------------------
//
/// Top-level configuration for an [`crate::engine::Engine`].
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub compression: CompressionConfig,
    pub training: TrainingConfig,
    pub gc: GcConfig,
    pub sampling: SamplingConfig,
    pub async_dispatch: AsyncDispatchConfig,
    pub filters: FilterConfig,
}

impl Config {
    /// Validates every numeric range the spec states inline. Called once by the host before
    /// constructing an `Engine`; never called on the hot path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first out-of-range field encountered.
    pub fn validate(&self) -> Result<(), Error> {
        self.compression.validate()?;
        self.training.validate()?;
        self.gc.validate()?;
        self.sampling.validate()?;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn zero_zstd_level_means_three() {
        let cfg = CompressionConfig::default();
        assert_eq!(cfg.effective_level(), 3);
    }

    #[test]
    fn rejects_out_of_range_zstd_level() {
        let mut cfg = Config::default();
        cfg.compression.zstd_level = 23;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_max_comp_size_above_safety_cap() {
        let mut cfg = Config::default();
        cfg.compression.max_comp_size = 257 * 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_sample_p_out_of_range() {
        let mut cfg = Config::default();
        cfg.sampling.sample_p = 0.0;
        assert!(cfg.validate().is_err());
        cfg.sampling.sample_p = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_dict_retain_max_out_of_range() {
        let mut cfg = Config::default();
        cfg.gc.dict_retain_max = 0;
        assert!(cfg.validate().is_err());
        cfg.gc.dict_retain_max = 300;
        assert!(cfg.validate().is_err());
    }
}
