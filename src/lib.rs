pub mod api;
pub mod artifacts;
pub mod codec;
pub mod config;
pub mod dsp;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod source;

pub use artifacts::{ArtifactManager, ArtifactScope, ReleaseSummary};
pub use config::Settings;
pub use dsp::{TransformEngine, TransformParameters, TransformStage};
pub use error::{AppError, ConversionError, ErrorKind};
pub use orchestrator::{CancelToken, ConversionOrchestrator, ConversionResult, ConversionStage};
pub use source::{MediaSource, SourceResolver};
