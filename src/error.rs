//! Error returned from the `quiverdict` crate. This includes codec errors, dictionary pool
//! errors, routing-table scan errors, trainer errors, and so on.

// -------------------------------------------------------------------------------------------------
//
/// Error returned from the `quiverdict` crate.
///
/// Every hot-path function (`Engine::encode`, `Engine::decode`, pool and table accessors) returns
/// one of these instead of panicking. Trainer and GC failures are logged and counted rather than
/// surfaced here; see [`TrainerError`] for those.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A required argument was null, empty, or out of the bounds the caller documented.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `decode` was called with a `dict_id` that does not resolve in the current routing table.
    #[error("unknown dictionary id {0}")]
    UnknownDictionary(u16),

    /// The codec reported that a frame's content size could not be determined, or decoding it
    /// failed mid-stream.
    #[error("corrupt compressed frame")]
    CorruptFrame,

    /// The decompressed size of a frame exceeds the caller-provided cap.
    #[error("decompressed output of {actual} bytes exceeds the {cap} byte cap")]
    Oversize { actual: usize, cap: usize },

    /// A buffer allocation or metadata duplication failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Reading or writing a manifest or dictionary blob failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// No free dictionary id remained in `1..65535`, or the worker pool's queue is shutting down.
    #[error("exhausted: {0}")]
    Exhausted(String),

    /// A non-fatal trainer failure. Counted by the caller; sampling continues.
    #[error(transparent)]
    Trainer(#[from] TrainerError),

    /// The directory scan that builds a routing table failed outright; the current table is left
    /// in place.
    #[error("dictionary directory scan failed: {0}")]
    ScanFailed(String),
}

impl Error {
    /// Helper for constructing [`Error::InvalidInput`] from anything displayable.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

// -------------------------------------------------------------------------------------------------
//
/// Non-fatal errors raised while training a replacement dictionary (C8). These are always counted
/// and logged; they never abort the trainer loop or the hot path.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TrainerError {
    /// The sampled corpus was empty or the sampler's lock could not be taken.
    #[error("reservoir snapshot was empty or unavailable")]
    EmptySnapshot,

    /// The underlying `zstd` dictionary trainer returned an error.
    #[error("dictionary training failed: {0}")]
    Training(String),

    /// A trained dictionary was produced but fell below the 1 KiB floor and was discarded.
    #[error("trained dictionary of {0} bytes is below the 1 KiB floor")]
    TooSmall(usize),

    /// No dictionary id provider (default or host-supplied) had a free id to allocate.
    #[error("no free dictionary id available")]
    IdsExhausted,

    /// The host's publisher callback returned an error. The dictionary was still persisted
    /// locally; only replication to followers failed.
    #[error("publisher callback failed: {0}")]
    PublishFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
