// crates/sync-core/src/lib.rs

pub mod error;
pub mod model;
pub mod progress;
pub mod project;

pub use error::{EngineError, EngineResult};
pub use model::{
    AnalysisResult, BitDepth, Clip, Config, ExportFormat, MediaKind, Track, ANALYSIS_RATE,
    CONFIDENCE_THRESHOLD,
};
pub use progress::{CancelHandle, ProgressEvent};
pub use project::{ProjectFile, PROJECT_SCHEMA_VERSION};
