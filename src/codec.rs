//! The dictionary-aware stream codec (C7's hot-path dependency).
//!
//! The spec deliberately does not define the compression algorithm itself — it assumes "a
//! dictionary-aware stream codec" with a small set of properties (§6, §1 Non-goals). This module
//! is the one concrete backend this crate ships: `zstd`, the same codec the teacher lineage's
//! dictionary-compressor implementation (`zstd::bulk` plus `zstd::dict`) uses.

use crate::error::Error;
use zstd::dict::{DecoderDictionary, EncoderDictionary};

/// A compiled dictionary: owned encoder/decoder objects built once from a dictionary blob and
/// shared, via the pool (C3), across every metadata record and table generation that references
/// it.
pub struct CompiledDict {
    encoder: EncoderDictionary<'static>,
    decoder: DecoderDictionary<'static>,
    byte_len: usize,
}

impl CompiledDict {
    /// Compiles `bytes` at `level` into owned encoder/decoder dictionaries. The dictionary bytes
    /// are copied in, so the result does not borrow from `bytes` and can outlive it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the underlying allocation fails.
    pub fn compile(bytes: &[u8], level: i32) -> Result<Self, Error> {
        let encoder = EncoderDictionary::copy(bytes, level);
        let decoder = DecoderDictionary::copy(bytes);
        Ok(Self { encoder, decoder, byte_len: bytes.len() })
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}

/// Reusable per-thread compressor/decompressor state plus a geometrically-grown scratch buffer.
/// Created lazily on first use by each thread and never shared across threads; torn down on
/// thread exit along with the thread-local that owns it.
pub struct ThreadCodecCache {
    scratch: Vec<u8>,
}

impl Default for ThreadCodecCache {
    fn default() -> Self {
        Self { scratch: Vec::new() }
    }
}

impl ThreadCodecCache {
    /// Grows `scratch` to at least `needed` bytes, doubling rather than reallocating exactly to
    /// `needed` on every call, so typical payloads settle into a scratch buffer that stops
    /// growing after the first few calls on a given thread.
    fn reserve(&mut self, needed: usize) {
        if self.scratch.len() < needed {
            let target = needed.max(self.scratch.len() * 2).max(4096);
            self.scratch.resize(target, 0);
        }
    }

    /// Compresses `data` at `level`, optionally with a dictionary, compressing directly into this
    /// cache's reused scratch buffer rather than letting the codec allocate its own. Returns the
    /// compressed bytes as an owned `Vec<u8>` (one copy out of scratch, since scratch itself is
    /// reused by the next call on this thread).
    pub fn compress(
        &mut self,
        data: &[u8],
        level: i32,
        dict: Option<&CompiledDict>,
    ) -> Result<Vec<u8>, Error> {
        let bound = zstd::bulk::compress_bound(data.len());
        self.reserve(bound);

        let written = if let Some(dict) = dict {
            let mut compressor = zstd::bulk::Compressor::with_prepared_dictionary(&dict.encoder)
                .map_err(|e| Error::OutOfMemory(e.to_string()))?;
            compressor
                .compress_to_buffer(data, &mut self.scratch[..bound])
                .map_err(|e| Error::OutOfMemory(e.to_string()))?
        } else {
            let mut compressor =
                zstd::bulk::Compressor::new(level).map_err(|e| Error::OutOfMemory(e.to_string()))?;
            compressor
                .compress_to_buffer(data, &mut self.scratch[..bound])
                .map_err(|e| Error::OutOfMemory(e.to_string()))?
        };
        Ok(self.scratch[..written].to_vec())
    }

    /// Decompresses `frame`, optionally with a dictionary, into a buffer sized from the frame's
    /// reported content size (or `fallback_cap` if the codec cannot report one).
    pub fn decompress(
        &mut self,
        frame: &[u8],
        dict: Option<&CompiledDict>,
        fallback_cap: usize,
    ) -> Result<Vec<u8>, Error> {
        let cap = content_size(frame).map_or(fallback_cap, |n| n as usize).max(1);

        let result = if let Some(dict) = dict {
            let mut decompressor =
                zstd::bulk::Decompressor::with_prepared_dictionary(&dict.decoder)
                    .map_err(|_| Error::CorruptFrame)?;
            decompressor.decompress(frame, cap)
        } else {
            zstd::bulk::decompress(frame, cap)
        };

        result.map_err(|_| Error::CorruptFrame)
    }
}

/// Returns the frame's declared decompressed content size, if the codec can determine one. Used
/// both by `decompress`'s buffer sizing and by [`is_compressed`].
#[must_use]
pub fn content_size(frame: &[u8]) -> Option<u64> {
    zstd::zstd_safe::get_frame_content_size(frame).ok().flatten()
}

/// `true` iff `frame` is a frame this codec can report a valid content size for (not an error,
/// not "unknown").
#[must_use]
pub fn is_compressed(frame: &[u8]) -> bool {
    content_size(frame).is_some()
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_dictionary() {
        let mut cache = ThreadCodecCache::default();
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = cache.compress(&data, 3, None).expect("compress");
        let decompressed = cache.decompress(&compressed, None, data.len() * 2).expect("decompress");
        assert_eq!(decompressed, data);
    }

    #[test]
    fn round_trips_with_dictionary() {
        let dict_bytes = b"common prefix text used across many similar values ".repeat(100);
        let compiled = CompiledDict::compile(&dict_bytes, 3).expect("compile");
        let mut cache = ThreadCodecCache::default();
        let data = b"common prefix text used across many similar values plus a unique tail";
        let compressed = cache.compress(data, 3, Some(&compiled)).expect("compress");
        let decompressed =
            cache.decompress(&compressed, Some(&compiled), data.len() * 4).expect("decompress");
        assert_eq!(decompressed, data);
    }

    #[test]
    fn is_compressed_true_for_zstd_frame() {
        let mut cache = ThreadCodecCache::default();
        let compressed = cache.compress(b"hello world hello world", 3, None).expect("compress");
        assert!(is_compressed(&compressed));
    }

    #[test]
    fn is_compressed_false_for_raw_bytes() {
        assert!(!is_compressed(b"not a zstd frame at all"));
    }
}
