use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::discovery::ToolLocator;
use super::error::summarize_run_error;
use super::runner::run_tool_blocking;
use super::{AudioCodec, path_to_string};
use crate::error::AppError;

/// Normalized intermediate produced by every decode.
pub const DECODE_SAMPLE_RATE: u32 = 44_100;
pub const DECODE_CHANNELS: u16 = 2;
pub const DEFAULT_MP3_BITRATE_KBPS: u32 = 192;

/// Decode/encode through an ffmpeg binary found by a shared locator.
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    locator: Arc<ToolLocator>,
    timeout: Option<Duration>,
    bitrate_kbps: u32,
}

impl FfmpegCodec {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self {
            locator,
            timeout: None,
            bitrate_kbps: DEFAULT_MP3_BITRATE_KBPS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_bitrate_kbps(mut self, kbps: u32) -> Self {
        self.bitrate_kbps = kbps.clamp(64, 320);
        self
    }

    pub fn locator(&self) -> &Arc<ToolLocator> {
        &self.locator
    }
}

pub fn build_decode_args(input: &str, output: &str) -> Vec<String> {
    [
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "error",
        "-y",
        "-i",
        input,
        "-vn",
        "-ac",
        &DECODE_CHANNELS.to_string(),
        "-ar",
        &DECODE_SAMPLE_RATE.to_string(),
        "-c:a",
        "pcm_s16le",
        "-f",
        "wav",
        output,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn build_encode_args(input: &str, output: &str, bitrate_kbps: u32) -> Vec<String> {
    [
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "error",
        "-y",
        "-i",
        input,
        "-vn",
        "-c:a",
        "libmp3lame",
        "-b:a",
        &format!("{}k", bitrate_kbps),
        "-f",
        "mp3",
        output,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl AudioCodec for FfmpegCodec {
    fn decode_to_wav(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        let ffmpeg = self.locator.locate()?;
        let args = build_decode_args(&path_to_string(input), &path_to_string(output));
        run_tool_blocking(&ffmpeg, &args, self.timeout)
            .map_err(|e| AppError::Decode(summarize_run_error(&e)))?;
        if !output.is_file() {
            return Err(AppError::Decode(format!(
                "decoder produced no output at {}",
                output.display()
            )));
        }
        Ok(())
    }

    fn encode_deliverable(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        let ffmpeg = self.locator.locate()?;
        let args = build_encode_args(
            &path_to_string(input),
            &path_to_string(output),
            self.bitrate_kbps,
        );
        run_tool_blocking(&ffmpeg, &args, self.timeout)
            .map_err(|e| AppError::Encode(summarize_run_error(&e)))?;
        if !output.is_file() {
            return Err(AppError::Encode(format!(
                "encoder produced no output at {}",
                output.display()
            )));
        }
        Ok(())
    }

    fn deliverable_extension(&self) -> &'static str {
        "mp3"
    }
}
