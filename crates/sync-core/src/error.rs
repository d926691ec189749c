// crates/sync-core/src/error.rs

use thiserror::Error;

/// Category of failure surfaced by the analysis/sync engine.
///
/// Categories map to process exit codes at the CLI boundary: `Cancelled` is
/// 130, every other variant is 1, success is 0.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("external media decoder not found in PATH (looked for ffmpeg/ffprobe)")]
    DecoderUnavailable,

    #[error("failed to decode '{path}': {reason}")]
    DecodeFailure { path: String, reason: String },

    #[error("need at least two clips to run analysis, got {0}")]
    NotEnoughData(usize),

    #[error("placement confidence below threshold for '{clip}': {confidence:.2}")]
    LowConfidence { clip: String, confidence: f64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Process exit code this error should surface as when the engine is
    /// wrapped behind a CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Cancelled => 130,
            _ => 1,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    pub fn decode_failure(path: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::DecodeFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn low_confidence(clip: impl Into<String>, confidence: f64) -> Self {
        EngineError::LowConfidence {
            clip: clip.into(),
            confidence,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_exits_130() {
        assert_eq!(EngineError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn other_errors_exit_1() {
        assert_eq!(EngineError::NotEnoughData(1).exit_code(), 1);
        assert_eq!(EngineError::DecoderUnavailable.exit_code(), 1);
        assert_eq!(EngineError::internal("bad state").exit_code(), 1);
    }

    #[test]
    fn decode_failure_constructor_formats_message() {
        let err = EngineError::decode_failure("clip.mov", "ffmpeg exited with status 1");
        assert!(err.to_string().contains("clip.mov"));
        assert!(err.to_string().contains("ffmpeg exited"));
    }
}
