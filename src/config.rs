//! Service settings read from `LOFI_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_DURATION_SECS: u64 = 600;
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:8000",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:3001",
    "http://127.0.0.1:8000",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub ffmpeg_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub max_duration_secs: u64,
    pub allowed_origins: Vec<String>,
    pub temp_root: PathBuf,
    pub fetch_timeout: Duration,
    pub codec_timeout: Duration,
    pub transform_timeout: Duration,
    pub mp3_bitrate_kbps: u32,
    pub stale_artifact_age: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            ffmpeg_path: None,
            ytdlp_path: None,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            temp_root: std::env::temp_dir().join("lofi-converter"),
            fetch_timeout: Duration::from_secs(120),
            codec_timeout: Duration::from_secs(60),
            transform_timeout: Duration::from_secs(60),
            mp3_bitrate_kbps: 192,
            stale_artifact_age: Duration::from_secs(24 * 3600),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Unset or blank keys keep their defaults; a value that
    /// does not parse is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut settings = Self::default();

        if let Some(addr) = get("LOFI_BIND_ADDR") {
            settings.bind_addr = parse("LOFI_BIND_ADDR", &addr)?;
        }
        if let Some(port) = get("PORT") {
            settings.bind_addr.set_port(parse("PORT", &port)?);
        }
        settings.ffmpeg_path = get("LOFI_FFMPEG_PATH").map(PathBuf::from);
        settings.ytdlp_path = get("LOFI_YTDLP_PATH").map(PathBuf::from);
        if let Some(v) = get("LOFI_MAX_DURATION_SECS") {
            settings.max_duration_secs = parse("LOFI_MAX_DURATION_SECS", &v)?;
        }
        if let Some(v) = get("LOFI_ALLOWED_ORIGINS") {
            settings.allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("LOFI_TEMP_ROOT") {
            settings.temp_root = PathBuf::from(v);
        }
        if let Some(v) = get("LOFI_FETCH_TIMEOUT_SECS") {
            settings.fetch_timeout = seconds("LOFI_FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LOFI_CODEC_TIMEOUT_SECS") {
            settings.codec_timeout = seconds("LOFI_CODEC_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LOFI_TRANSFORM_TIMEOUT_SECS") {
            settings.transform_timeout = seconds("LOFI_TRANSFORM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LOFI_MP3_BITRATE_KBPS") {
            let kbps: u32 = parse("LOFI_MP3_BITRATE_KBPS", &v)?;
            settings.mp3_bitrate_kbps = kbps.clamp(64, 320);
        }
        if let Some(v) = get("LOFI_STALE_ARTIFACT_HOURS") {
            let hours: u64 = parse("LOFI_STALE_ARTIFACT_HOURS", &v)?;
            settings.stale_artifact_age = Duration::from_secs(hours.saturating_mul(3600));
        }
        Ok(settings)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| AppError::Config(format!("{}={:?}: {}", key, value, e)))
}

fn seconds(key: &str, value: &str) -> Result<Duration, AppError> {
    let secs: u64 = parse(key, value)?;
    if secs == 0 {
        return Err(AppError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_secs(secs))
}
