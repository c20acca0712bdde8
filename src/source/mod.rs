//! Remote media acquisition: URL validation, duration policy, download and decode into the
//! request's artifact scope.

mod ytdlp;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use url::Url;
use uuid::Uuid;

use crate::artifacts::ArtifactScope;
use crate::codec::AudioCodec;
use crate::error::AppError;

pub use ytdlp::{YtDlpSource, build_download_args, build_probe_args, parse_probe_output};

pub const DECODED_FILE_NAME: &str = "decoded.wav";

/// A validated conversion request.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRequest {
    pub url: Url,
    pub requested_at: SystemTime,
}

impl SourceRequest {
    /// Accept only absolute `http`/`https` URLs with a host.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed).map_err(|e| AppError::InvalidUrl(format!("{trimmed}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::InvalidUrl(format!(
                "{trimmed}: scheme must be http or https"
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(AppError::InvalidUrl(format!("{trimmed}: missing host")));
        }
        Ok(Self {
            url,
            requested_at: SystemTime::now(),
        })
    }
}

/// Opaque handle to the audio-only stream chosen by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamDescriptor {
    pub format_id: String,
    pub extension: Option<String>,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub title: String,
    pub duration_seconds: f64,
    pub stream: StreamDescriptor,
}

/// Decoded PCM audio on local storage, owned by one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAudioAsset {
    pub path: PathBuf,
    pub encoding: String,
    pub sample_rate: u32,
    pub channel_count: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub metadata: SourceMetadata,
    pub asset: RawAudioAsset,
}

/// The remote platform. `probe` must not download anything.
pub trait MediaSource: Send + Sync {
    fn probe(&self, url: &Url) -> Result<SourceMetadata, AppError>;

    /// Fetch `stream` into `dest_dir`, naming the file `<stem>.<ext>`. Returns the file written.
    fn download(
        &self,
        url: &Url,
        stream: &StreamDescriptor,
        dest_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, AppError>;
}

pub struct SourceResolver {
    source: Arc<dyn MediaSource>,
    codec: Arc<dyn AudioCodec>,
    max_duration_secs: u64,
}

impl SourceResolver {
    pub fn new(
        source: Arc<dyn MediaSource>,
        codec: Arc<dyn AudioCodec>,
        max_duration_secs: u64,
    ) -> Self {
        Self {
            source,
            codec,
            max_duration_secs,
        }
    }

    pub fn max_duration_secs(&self) -> u64 {
        self.max_duration_secs
    }

    pub fn codec(&self) -> &Arc<dyn AudioCodec> {
        &self.codec
    }

    /// Validate, probe, download and decode. Nothing touches `scope` until the URL and the
    /// duration have both passed.
    pub fn resolve(&self, url: &str, scope: &mut ArtifactScope) -> Result<ResolvedSource, AppError> {
        let request = SourceRequest::parse(url)?;
        let metadata = self.source.probe(&request.url)?;
        self.check_duration(&metadata)?;
        log::info!(
            target: "lofi::source",
            "Resolved \"{}\" ({:.1}s, format {})",
            metadata.title,
            metadata.duration_seconds,
            metadata.stream.format_id
        );

        let area = scope.area()?;
        let stem = format!("download-{}", Uuid::new_v4().simple());
        let downloaded = self
            .source
            .download(&request.url, &metadata.stream, &area, &stem)
            .map_err(|e| match e {
                AppError::Extraction(_) => e,
                other => AppError::Extraction(other.to_string()),
            })?;
        scope.register(downloaded.clone());
        if !downloaded.is_file() {
            return Err(AppError::Extraction(format!(
                "downloaded file missing at {}",
                downloaded.display()
            )));
        }

        let decoded = scope.allocate(DECODED_FILE_NAME)?;
        let asset = match self.decode(&downloaded, &decoded) {
            Ok(asset) => asset,
            Err(e) => {
                if let Err(cleanup) = scope.release(&decoded) {
                    log::warn!(
                        target: "lofi::source",
                        "Failed to remove partial decode {}: {}",
                        decoded.display(),
                        cleanup
                    );
                }
                return Err(e);
            }
        };

        if let Err(e) = scope.release(&downloaded) {
            log::warn!(
                target: "lofi::source",
                "Failed to remove download {}: {}",
                downloaded.display(),
                e
            );
        }
        Ok(ResolvedSource { metadata, asset })
    }

    fn check_duration(&self, metadata: &SourceMetadata) -> Result<(), AppError> {
        let duration = metadata.duration_seconds;
        if !duration.is_finite() || duration < 0.0 {
            return Err(AppError::Extraction(format!(
                "source reported an invalid duration ({duration})"
            )));
        }
        if duration > self.max_duration_secs as f64 {
            log::info!(
                target: "lofi::source",
                "Rejecting \"{}\": {:.0}s exceeds {}s",
                metadata.title,
                duration,
                self.max_duration_secs
            );
            return Err(AppError::DurationExceeded {
                duration_secs: duration,
                max_secs: self.max_duration_secs,
            });
        }
        Ok(())
    }

    fn decode(&self, input: &Path, output: &Path) -> Result<RawAudioAsset, AppError> {
        self.codec.decode_to_wav(input, output)?;
        if !output.is_file() {
            return Err(AppError::Decode(format!(
                "expected decoded audio at {}",
                output.display()
            )));
        }
        let spec = hound::WavReader::open(output)
            .map_err(|e| AppError::Decode(format!("unreadable decoded audio: {e}")))?
            .spec();
        Ok(RawAudioAsset {
            path: output.to_path_buf(),
            encoding: "pcm_s16le".to_string(),
            sample_rate: spec.sample_rate,
            channel_count: spec.channels,
        })
    }
}
