use crate::audio::ChromaClass;

/// Errors raised by the mixer core.
///
/// Configuration variants are reported synchronously at construction time.
/// The per-call variants signal upstream contract violations and are fatal to
/// the call that hit them, never retried.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid pitch range: min {min:?} must be strictly below max {max:?}")]
    InvalidRange { min: ChromaClass, max: ChromaClass },

    #[error("tempo oracle returned {count} BPM candidates, expected exactly one")]
    UnexpectedOracleOutput { count: usize },

    #[error("no chroma analyzed for second {second}, only {available} seconds available")]
    OutOfRangeSecond { second: usize, available: usize },

    #[error("feature snapshot is missing the {0} field required by a configured action")]
    MissingFeature(&'static str),

    #[error("frame dimensions do not match: {0}x{1} vs {2}x{3}")]
    MismatchedFrames(u32, u32, u32, u32),
}

pub type Result<T> = std::result::Result<T, MixerError>;
