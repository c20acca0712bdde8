use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::{MediaSource, SourceMetadata, StreamDescriptor};
use crate::codec::discovery::ToolLocator;
use crate::codec::path_to_string;
use crate::codec::runner::{RunError, run_tool_blocking};
use crate::error::AppError;

/// Best audio-only stream, falling back to the best muxed stream.
const FORMAT_SELECTOR: &str = "bestaudio/best";

/// `yt-dlp` as the remote platform.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    locator: Arc<ToolLocator>,
    ffmpeg: Option<Arc<ToolLocator>>,
    timeout: Option<Duration>,
}

impl YtDlpSource {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self {
            locator,
            ffmpeg: None,
            timeout: None,
        }
    }

    /// Let yt-dlp reuse the codec tool for any remuxing it does.
    pub fn with_ffmpeg(mut self, ffmpeg: Arc<ToolLocator>) -> Self {
        self.ffmpeg = Some(ffmpeg);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn locator(&self) -> &Arc<ToolLocator> {
        &self.locator
    }

    fn run(&self, args: &[String]) -> Result<String, AppError> {
        let program = self
            .locator
            .locate()
            .map_err(|e| AppError::Extraction(e.to_string()))?;
        run_tool_blocking(&program, args, self.timeout)
            .map(|out| out.stdout)
            .map_err(|e| AppError::Extraction(describe_failure(&e)))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeJson {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    format_id: Option<String>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
}

pub fn build_probe_args(url: &str) -> Vec<String> {
    [
        "--dump-single-json",
        "--skip-download",
        "--no-playlist",
        "--no-warnings",
        "-f",
        FORMAT_SELECTOR,
        url,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn build_download_args(
    url: &str,
    format_id: &str,
    dest_dir: &Path,
    stem: &str,
    ffmpeg: Option<&Path>,
) -> Vec<String> {
    let template = dest_dir.join(format!("{stem}.%(ext)s"));
    let mut args: Vec<String> = [
        "--no-playlist",
        "--no-progress",
        "--no-warnings",
        "--no-part",
        "-f",
        format_id,
        "-o",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(path_to_string(&template));
    if let Some(ffmpeg) = ffmpeg {
        args.push("--ffmpeg-location".to_string());
        args.push(path_to_string(ffmpeg));
    }
    args.push(url.to_string());
    args
}

/// Parse `--dump-single-json` output into metadata for the selected stream.
pub fn parse_probe_output(json: &str) -> Result<SourceMetadata, AppError> {
    let probe: ProbeJson = serde_json::from_str(json)
        .map_err(|e| AppError::Extraction(format!("unreadable metadata: {e}")))?;
    if probe.is_live == Some(true) {
        return Err(AppError::Extraction(
            "live streams cannot be converted".to_string(),
        ));
    }
    let duration_seconds = probe.duration.ok_or_else(|| {
        AppError::Extraction("source did not report a duration".to_string())
    })?;
    let format_id = probe
        .format_id
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| FORMAT_SELECTOR.to_string());
    Ok(SourceMetadata {
        title: probe.title.unwrap_or_default(),
        duration_seconds,
        stream: StreamDescriptor {
            format_id,
            extension: probe.ext,
            codec: probe.acodec.filter(|c| c != "none"),
        },
    })
}

fn describe_failure(err: &RunError) -> String {
    match err {
        RunError::Failed { stderr, code, .. } => stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| l.strip_prefix("ERROR: ").unwrap_or(l).to_string())
            .unwrap_or_else(|| format!("yt-dlp exited with code {code}")),
        other => other.to_string(),
    }
}

/// The file yt-dlp wrote for `stem`, ignoring leftovers like `.part` and `.ytdl`.
fn find_by_stem(dir: &Path, stem: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| p.file_stem().and_then(|s| s.to_str()) == Some(stem))
        .filter(|p| {
            !matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("part" | "ytdl" | "temp")
            )
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

impl MediaSource for YtDlpSource {
    fn probe(&self, url: &Url) -> Result<SourceMetadata, AppError> {
        log::debug!(target: "lofi::source", "Probing {}", url);
        let stdout = self.run(&build_probe_args(url.as_str()))?;
        parse_probe_output(&stdout)
    }

    fn download(
        &self,
        url: &Url,
        stream: &StreamDescriptor,
        dest_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, AppError> {
        let ffmpeg = self.ffmpeg.as_ref().and_then(|l| l.locate().ok());
        let args = build_download_args(
            url.as_str(),
            &stream.format_id,
            dest_dir,
            stem,
            ffmpeg.as_deref(),
        );
        self.run(&args)?;
        let path = find_by_stem(dest_dir, stem).ok_or_else(|| {
            AppError::Extraction(format!(
                "download finished but no file named {stem}.* was written"
            ))
        })?;
        log::debug!(target: "lofi::source", "Downloaded {}", path.display());
        Ok(path)
    }
}
