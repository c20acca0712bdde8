pub mod discovery;
mod error;
mod ffmpeg;
pub mod runner;

use std::path::Path;

use crate::error::AppError;

pub use discovery::{DiscoveryStrategy, HostEnvironment, SystemHost, ToolLocator};
pub use ffmpeg::{
    DECODE_CHANNELS, DECODE_SAMPLE_RATE, DEFAULT_MP3_BITRATE_KBPS, FfmpegCodec, build_decode_args,
    build_encode_args,
};
pub use runner::{RunError, ToolOutput, run_tool_blocking};

/// Decode and encode steps performed by the external codec tool.
pub trait AudioCodec: Send + Sync {
    /// Decode any container the source resolver produced into 16-bit PCM WAV.
    fn decode_to_wav(&self, input: &Path, output: &Path) -> Result<(), AppError>;

    /// Encode the processed WAV into the deliverable format.
    fn encode_deliverable(&self, input: &Path, output: &Path) -> Result<(), AppError>;

    fn deliverable_extension(&self) -> &'static str {
        "mp3"
    }
}

/// Path to string for tool args or logging.
pub fn path_to_string(path: &(impl AsRef<Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
