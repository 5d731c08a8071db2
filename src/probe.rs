//! Fast heuristic that decides, for a candidate payload, whether attempting compression is worth
//! the codec work at all (C1).
//!
//! The probe is pure, stateless, and bounded: it never looks past the first 512 bytes of its
//! input and never allocates more than that.

const SAMPLE_LEN: usize = 512;

/// Bytes that begin a well-known already-compressed or media container format.
const MAGIC_SIGNATURES: &[&[u8]] = &[
    &[0x28, 0xB5, 0x2F, 0xFD],       // zstd frame
    &[0x50, 0x4B, 0x03, 0x04],       // zip
    &[0x50, 0x4B, 0x05, 0x06],       // zip (empty archive)
    &[0x1F, 0x8B],                   // gzip
    &[0x04, 0x22, 0x4D, 0x18],       // lz4 frame
    &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], // xz
    &[0x42, 0x5A, 0x68],             // bzip2
    &[0xFF, 0xD8, 0xFF],             // jpeg
    &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], // png
    &[0x47, 0x49, 0x46, 0x38],       // gif
    &[0x4F, 0x67, 0x67, 0x53],       // ogg
    &[0x25, 0x50, 0x44, 0x46],       // pdf
    &[0x49, 0x44, 0x33],             // mp3 (ID3 tag)
];

/// Returns `true` if `buf` begins with a RIFF/WEBP or ISO-BMFF/`ftyp` container header.
fn has_container_magic(buf: &[u8]) -> bool {
    if buf.len() >= 12 && &buf[0..4] == b"RIFF" && &buf[8..12] == b"WEBP" {
        return true;
    }
    if buf.len() >= 8 && &buf[4..8] == b"ftyp" {
        return true;
    }
    false
}

/// Returns `true` if `buf` starts with a valid zlib/deflate header (a correct `CMF`/`FLG` pair
/// whose 16-bit big-endian value is a multiple of 31, per RFC 1950).
fn has_valid_zlib_header(buf: &[u8]) -> bool {
    if buf.len() < 2 {
        return false;
    }
    let cmf = buf[0];
    let flg = buf[1];
    if cmf & 0x0F != 8 {
        return false;
    }
    let word = u16::from_be_bytes([cmf, flg]);
    word % 31 == 0
}

fn looks_like_known_compressed(sample: &[u8]) -> bool {
    MAGIC_SIGNATURES.iter().any(|sig| sample.starts_with(sig))
        || has_container_magic(sample)
        || has_valid_zlib_header(sample)
}

/// Fraction of `sample` that is printable ASCII (0x20..=0x7E, plus tab/LF/CR).
fn ascii_printable_ratio(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 1.0;
    }
    let printable = sample
        .iter()
        .filter(|&&b| (0x20..=0x7E).contains(&b) || matches!(b, b'\t' | b'\n' | b'\r'))
        .count();
    printable as f64 / sample.len() as f64
}

/// Shannon entropy, in bits/byte, of `sample` over a 256-bin byte histogram.
fn byte_entropy(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let mut histogram = [0u32; 256];
    for &b in sample {
        histogram[b as usize] += 1;
    }
    let len = sample.len() as f64;
    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Returns `true` if `sample` looks like base64-encoded text: almost entirely alphabet
/// characters (`A-Za-z0-9+/`) with few `=` padding bytes.
fn looks_base64(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    let alphabet = sample
        .iter()
        .filter(|&&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
        .count();
    let padding = sample.iter().filter(|&&b| b == b'=').count();
    let ratio = alphabet as f64 / sample.len() as f64;
    ratio >= 0.90 && padding <= 2
}

/// Decides whether `buf` is likely incompressible and not worth running through the codec.
///
/// Follows the five-step heuristic: known-magic short-circuit, ASCII-ratio short-circuit,
/// entropy thresholds, base64-likeness, and finally a fast-level trial compression as a
/// tie-breaker for samples in the entropy gray zone.
#[must_use]
pub fn is_likely_incompressible(buf: &[u8]) -> bool {
    let sample = &buf[..buf.len().min(SAMPLE_LEN)];

    if looks_like_known_compressed(sample) {
        return true;
    }

    if ascii_printable_ratio(sample) >= 0.85 {
        return false;
    }

    let entropy = byte_entropy(sample);
    if entropy >= 7.5 {
        return true;
    }
    if entropy <= 7.0 {
        return false;
    }

    if looks_base64(sample) {
        return true;
    }

    trial_compress_gain(sample) < 0.02
}

/// Compresses `sample` at zstd level 1 and returns the relative size reduction, `1 -
/// compressed/original`. Used only as the step-5 tie-breaker; never touches the engine's
/// per-thread scratch, so it stays usable standalone and from the trainer thread.
fn trial_compress_gain(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    match zstd::bulk::compress(sample, 1) {
        Ok(compressed) => 1.0 - (compressed.len() as f64 / sample.len() as f64),
        Err(_) => 0.0,
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_gzip_magic() {
        let mut buf = vec![0x1F, 0x8B, 0x08, 0x00];
        buf.extend(std::iter::repeat(0u8).take(100));
        assert!(is_likely_incompressible(&buf));
    }

    #[test]
    fn detects_zstd_magic() {
        let buf = [0x28, 0xB5, 0x2F, 0xFD, 1, 2, 3, 4];
        assert!(is_likely_incompressible(&buf));
    }

    #[test]
    fn detects_png_magic() {
        let buf = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert!(is_likely_incompressible(&buf));
    }

    #[test]
    fn plain_ascii_text_is_compressible() {
        let text = "the quick brown fox jumps over the lazy dog ".repeat(20);
        assert!(!is_likely_incompressible(text.as_bytes()));
    }

    #[test]
    fn high_entropy_random_bytes_are_incompressible() {
        // A fixed pseudo-random-looking buffer (not actually random, but high entropy and not
        // ASCII), generated deterministically so the test has no flakiness.
        let mut buf = vec![0u8; 512];
        let mut x: u32 = 0x1234_5678;
        for b in &mut buf {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            *b = (x & 0xFF) as u8;
        }
        assert!(is_likely_incompressible(&buf));
    }

    #[test]
    fn looks_base64_helper_recognizes_base64_alphabet() {
        // The step-4 base64 check is exercised directly: under the literal step ordering, pure
        // base64 text never reaches it (step 2's printable-ratio short-circuit returns false
        // first, since the base64 alphabet is a subset of printable ASCII). The helper itself is
        // still correct and unit-testable in isolation.
        let unit = "QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVphYmNkZWZnaGlqa2xtbm9wcXJzdHV2d3h5ejAxMjM0NTY3ODk";
        assert!(looks_base64(unit.as_bytes()));
        assert!(!is_likely_incompressible(unit.as_bytes()));
    }

    #[test]
    fn empty_buffer_is_compressible() {
        assert!(!is_likely_incompressible(&[]));
    }
}
