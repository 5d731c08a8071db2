//! The background training loop (C8): coordinates the sampling gate, corpus export, dictionary
//! training, persistence, and publication. Active only while the engine holds the leader role.

use crate::config::TrainMode;
use crate::engine::Engine;
use crate::error::TrainerError;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const MIN_DICT_BYTES: usize = 1024;
const HARD_MAX_DICT_BYTES: usize = 1024 * 1024;
const MIN_CORPUS_BYTES: usize = 1024;

/// Runs the trainer loop until `stop` is set. Intended to be spawned on its own thread by
/// [`Engine::on_role_change`].
pub fn run(engine: &Engine, stop: &AtomicBool) {
    let span = tracing::info_span!("trainer_loop");
    let _enter = span.enter();
    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_secs(1));
        if stop.load(Ordering::Acquire) {
            break;
        }
        iterate(engine);
    }
}

fn iterate(engine: &Engine) {
    let now = crate::efficiency::now_secs();
    let table = engine.current_table();

    let need = if !table.has_default_dict() {
        true
    } else {
        engine.efficiency.should_retrain(now)
    };
    if need {
        engine.train_active.store(true, Ordering::Release);
    }
    if !engine.train_active.load(Ordering::Acquire) {
        return;
    }

    engine.reservoir.check_start_session();
    if !engine.reservoir.ready() {
        return;
    }

    let Some(snapshot) = engine.reservoir.snapshot() else {
        tracing::warn!(error = %TrainerError::EmptySnapshot, "trainer snapshot unavailable");
        return;
    };

    if snapshot.total_bytes < MIN_CORPUS_BYTES || snapshot.count == 0 {
        tracing::warn!(error = %TrainerError::EmptySnapshot, "sampled corpus too small to train from");
        return;
    }

    let level = engine.config().compression.effective_level();
    let max_dict_bytes = engine.config().compression.dict_size.min(HARD_MAX_DICT_BYTES);

    let trained = match engine.config().training.train_mode {
        TrainMode::Fast => train_fast(&snapshot.flat, &snapshot.sizes, max_dict_bytes),
        TrainMode::Optimize => train_optimize(&snapshot.flat, &snapshot.sizes, max_dict_bytes, level),
    };

    let dict_bytes = match trained {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "dictionary training failed");
            return;
        },
    };

    if dict_bytes.len() < MIN_DICT_BYTES {
        tracing::warn!(error = %TrainerError::TooSmall(dict_bytes.len()), "trained dictionary too small, discarding");
        return;
    }

    match persist_and_publish(engine, &dict_bytes, level, now) {
        Ok(()) => {
            engine.efficiency.mark_retrained(now);
            engine.train_active.store(false, Ordering::Release);
            tracing::debug!("trainer published a new dictionary");
        },
        Err(e) => {
            tracing::warn!(error = %e, "failed to persist or publish a trained dictionary");
        },
    }
}

fn train_fast(samples: &[u8], sizes: &[usize], max_dict_bytes: usize) -> Result<Vec<u8>, TrainerError> {
    zstd::dict::from_continuous(samples, sizes, max_dict_bytes)
        .map_err(|e| TrainerError::Training(e.to_string()))
}

/// Runs the COVER-family optimizing trainer (`ZDICT_optimizeTrainFromBuffer_cover`), which
/// searches `(d, k)` segment parameters for the target compression `level` instead of taking the
/// fast trainer's fixed heuristic. Single-threaded, default split point, no dictionary shrinking.
fn train_optimize(
    samples: &[u8],
    sizes: &[usize],
    max_dict_bytes: usize,
    level: i32,
) -> Result<Vec<u8>, TrainerError> {
    let mut dict_buffer = vec![0u8; max_dict_bytes];
    let sizes: Vec<usize> = sizes.to_vec();

    // SAFETY: `dict_buffer` and `samples`/`sizes` outlive the call; `sizes.len()` matches the
    // number of size entries the samples buffer is sliced by, as required by the C API.
    let written = unsafe {
        let mut params: zstd_sys::ZDICT_cover_params_t = std::mem::zeroed();
        params.steps = 40;
        params.nbThreads = 1;
        params.zParams.compressionLevel = level;

        zstd_sys::ZDICT_optimizeTrainFromBuffer_cover(
            dict_buffer.as_mut_ptr().cast(),
            dict_buffer.len(),
            samples.as_ptr().cast(),
            sizes.as_ptr(),
            u32::try_from(sizes.len()).map_err(|_| TrainerError::Training("too many samples".to_owned()))?,
            &mut params,
        )
    };

    if unsafe { zstd_sys::ZDICT_isError(written) } != 0 {
        let msg = unsafe { std::ffi::CStr::from_ptr(zstd_sys::ZDICT_getErrorName(written)) };
        return Err(TrainerError::Training(msg.to_string_lossy().into_owned()));
    }

    dict_buffer.truncate(written);
    Ok(dict_buffer)
}

fn persist_and_publish(
    engine: &Engine,
    dict_bytes: &[u8],
    level: i32,
    now: i64,
) -> Result<(), crate::error::Error> {
    let id = alloc_id(engine)?;
    let uuid = uuid::Uuid::new_v4();
    let dir = &engine.config().compression.dict_dir;
    std::fs::create_dir_all(dir)?;

    let dict_path = dir.join(format!("{uuid}.dict"));
    write_atomic_blob(&dict_path, dict_bytes)?;

    let manifest_path = dir.join(format!("{uuid}.mf"));
    let manifest_text = format!(
        "id = {id}\ndict_file = {}\ncreated = {}\nlevel = {level}\n",
        dict_path.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
        Utc::now().to_rfc3339(),
    );
    std::fs::write(&manifest_path, manifest_text)?;

    let publish_result = engine.env().publish_dict(id, &uuid.to_string(), dict_bytes, manifest_path.as_os_str().as_encoded_bytes());
    if let Err(e) = publish_result {
        tracing::warn!(error = %e, "publisher callback failed; dictionary is still persisted locally");
    }

    engine.reload_dictionaries().map(|_| ())
}

fn write_atomic_blob(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let tmp = dir.join(format!(".{}.tmp", path.file_name().and_then(|n| n.to_str()).unwrap_or("dict")));
    {
        let mut file = std::fs::File::create(&tmp)?;
        std::io::Write::write_all(&mut file, bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    if let Ok(dir_handle) = std::fs::File::open(dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}

fn alloc_id(engine: &Engine) -> Result<u16, crate::error::Error> {
    if let Some(provider) = engine.env().id_provider() {
        return provider.alloc();
    }
    let table = engine.current_table();
    let disallowed = table.disallowed_ids(crate::efficiency::now_secs(), engine.config().gc.gc_quarantine_period_s);
    (1u32..=65535)
        .map(|i| i as u16)
        .find(|id| !disallowed.contains(id))
        .ok_or(crate::error::Error::Trainer(TrainerError::IdsExhausted))
}

/// The sampling hot-path hook, called on every write while the trainer may be active.
pub fn sample(engine: &Engine, key: &[u8], value: &[u8]) {
    if !engine.train_active.load(Ordering::Acquire) {
        return;
    }
    let cfg = &engine.config().sampling;
    if !cfg.enable_sampling {
        return;
    }
    if value.len() < engine.config().compression.min_comp_size || value.len() > engine.config().compression.max_comp_size {
        return;
    }

    if !accept_with_probability(cfg.sample_p) {
        return;
    }
    if crate::probe::is_likely_incompressible(value) {
        return;
    }
    let table = engine.current_table();
    if !table.is_default_ns(key) {
        return;
    }

    engine.reservoir.add(value);
}

fn accept_with_probability(p: f64) -> bool {
    use rand::Rng;
    rand::rng().random::<f64>() < p
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn iterate_bootstraps_when_no_default_dict_but_no_samples_ready() {
        let engine = Engine::new(Config::default());
        iterate(&engine);
        assert!(engine.is_training_active());
    }

    #[test]
    fn sample_ignored_when_trainer_not_active() {
        let engine = Engine::new(Config::default());
        sample(&engine, b"default:key", &vec![b'x'; 200]);
        assert!(!engine.reservoir.ready());
    }

    #[test]
    fn sample_accepts_compressible_default_namespace_payload_when_active() {
        let engine = Engine::new(Config::default());
        engine.train_active.store(true, Ordering::Release);
        engine.reservoir.check_start_session();
        let value = "the quick brown fox ".repeat(50);
        for _ in 0..200 {
            sample(&engine, b"anykey", value.as_bytes());
        }
        assert!(engine.reservoir.ready());
    }
}
