#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lofi_core::codec::discovery::{DiscoveryStrategy, SystemHost};
use lofi_core::codec::{AudioCodec, FfmpegCodec, ToolLocator};
use lofi_core::source::{MediaSource, SourceMetadata, StreamDescriptor};
use lofi_core::{
    AppError, ArtifactManager, CancelToken, ConversionOrchestrator, SourceResolver,
    TransformEngine,
};
use url::Url;

pub const CEILING_SECS: u64 = 600;

/// Remote platform stand-in. The "downloaded" file is already a WAV so the fake codec can copy it.
pub struct StubSource {
    pub title: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub probes: AtomicUsize,
    pub downloads: AtomicUsize,
    pub downloaded: parking_lot::Mutex<Vec<PathBuf>>,
}

impl StubSource {
    pub fn new(title: &str, duration_seconds: f64) -> Self {
        Self {
            title: title.to_string(),
            duration_seconds,
            sample_rate: 8_000,
            channels: 1,
            probes: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            downloaded: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst) + self.downloads.load(Ordering::SeqCst)
    }
}

impl MediaSource for StubSource {
    fn probe(&self, _url: &Url) -> Result<SourceMetadata, AppError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(SourceMetadata {
            title: self.title.clone(),
            duration_seconds: self.duration_seconds,
            stream: StreamDescriptor {
                format_id: "251".to_string(),
                extension: Some("webm".to_string()),
                codec: Some("opus".to_string()),
            },
        })
    }

    fn download(
        &self,
        _url: &Url,
        _stream: &StreamDescriptor,
        dest_dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, AppError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let path = dest_dir.join(format!("{stem}.webm"));
        write_sine_wav(
            &path,
            self.sample_rate,
            self.channels,
            self.duration_seconds,
        );
        self.downloaded.lock().push(path.clone());
        Ok(path)
    }
}

/// Codec stand-in: decode and encode are byte copies.
#[derive(Default)]
pub struct CopyCodec {
    pub decodes: AtomicUsize,
    pub encodes: AtomicUsize,
}

impl AudioCodec for CopyCodec {
    fn decode_to_wav(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        fs::copy(input, output).map_err(|e| AppError::Decode(e.to_string()))?;
        Ok(())
    }

    fn encode_deliverable(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        fs::copy(input, output).map_err(|e| AppError::Encode(e.to_string()))?;
        Ok(())
    }
}

/// Decodes like [`CopyCodec`] but leaves half a deliverable behind before failing the encode.
#[derive(Default)]
pub struct TruncatingEncodeCodec {
    pub partial: parking_lot::Mutex<Option<PathBuf>>,
}

impl AudioCodec for TruncatingEncodeCodec {
    fn decode_to_wav(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        fs::copy(input, output).map_err(|e| AppError::Decode(e.to_string()))?;
        Ok(())
    }

    fn encode_deliverable(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        let bytes = fs::read(input).map_err(|e| AppError::Encode(e.to_string()))?;
        fs::write(output, &bytes[..bytes.len() / 2]).map_err(|e| AppError::Encode(e.to_string()))?;
        *self.partial.lock() = Some(output.to_path_buf());
        Err(AppError::Encode("encoder exited mid-stream".to_string()))
    }
}

/// Decodes like [`CopyCodec`] and cancels `token` once the decoded file is written, as a client
/// disconnecting mid-request would.
pub struct CancellingCodec {
    pub token: CancelToken,
    pub encodes: AtomicUsize,
}

impl CancellingCodec {
    pub fn new(token: CancelToken) -> Self {
        Self {
            token,
            encodes: AtomicUsize::new(0),
        }
    }
}

impl AudioCodec for CancellingCodec {
    fn decode_to_wav(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        fs::copy(input, output).map_err(|e| AppError::Decode(e.to_string()))?;
        self.token.cancel();
        Ok(())
    }

    fn encode_deliverable(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        fs::copy(input, output).map_err(|e| AppError::Encode(e.to_string()))?;
        Ok(())
    }
}

pub fn write_sine_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f64) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    let frames = (sample_rate as f64 * seconds) as usize;
    for i in 0..frames {
        let t = i as f64 / sample_rate as f64;
        let v = (0.4 * (2.0 * std::f64::consts::PI * 220.0 * t).sin() * i16::MAX as f64) as i16;
        for _ in 0..channels {
            writer.write_sample(v).expect("write sample");
        }
    }
    writer.finalize().expect("finalize wav");
}

/// A locator that can never succeed.
pub fn absent_locator(tool: &'static str) -> Arc<ToolLocator> {
    Arc::new(ToolLocator::new(
        tool,
        vec![DiscoveryStrategy::Explicit(PathBuf::from(format!(
            "/nonexistent/{tool}"
        )))],
        Box::new(SystemHost),
    ))
}

/// A locator that always finds an executable: the running test binary.
pub fn present_locator(tool: &'static str) -> Arc<ToolLocator> {
    let exe = std::env::current_exe().expect("current exe");
    Arc::new(ToolLocator::new(
        tool,
        vec![DiscoveryStrategy::Explicit(exe)],
        Box::new(SystemHost),
    ))
}

pub fn missing_ffmpeg_codec() -> Arc<dyn AudioCodec> {
    Arc::new(FfmpegCodec::new(absent_locator("ffmpeg")))
}

pub fn orchestrator(
    root: &Path,
    source: Arc<StubSource>,
    codec: Arc<dyn AudioCodec>,
    engine: TransformEngine,
) -> ConversionOrchestrator {
    let resolver = SourceResolver::new(source, Arc::clone(&codec), CEILING_SECS);
    ConversionOrchestrator::new(resolver, engine, codec, ArtifactManager::new(root))
}

/// Every file and directory under `root`, recursively.
pub fn leftovers(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            found.push(path);
        }
    }
    found
}

pub fn wav_frames_and_rate(bytes: &[u8]) -> (u32, u32, u16) {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).expect("wav payload");
    let spec = reader.spec();
    (reader.duration(), spec.sample_rate, spec.channels)
}
