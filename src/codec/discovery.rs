use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::AppError;

/// Host facilities the locator needs. Swapped for a fake in tests.
pub trait HostEnvironment: Send + Sync {
    fn var(&self, key: &str) -> Option<OsString>;
    fn is_file(&self, path: &Path) -> bool;
    fn is_executable(&self, path: &Path) -> bool;
    fn mark_executable(&self, path: &Path) -> io::Result<()>;
    fn search_path(&self, program: &str) -> Option<PathBuf>;
}

/// The real process environment and filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl HostEnvironment for SystemHost {
    fn var(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    #[cfg(unix)]
    fn is_executable(&self, path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_executable(&self, path: &Path) -> bool {
        path.is_file()
    }

    #[cfg(unix)]
    fn mark_executable(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)
    }

    #[cfg(not(unix))]
    fn mark_executable(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn search_path(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// One way of finding a tool. Evaluated in order; the first accepted candidate wins.
#[derive(Debug, Clone)]
pub enum DiscoveryStrategy {
    /// Path supplied by configuration.
    Explicit(PathBuf),
    /// Path read from an environment variable.
    EnvVar(&'static str),
    /// Well-known install locations for this platform.
    WellKnown(Vec<PathBuf>),
    /// Executable search over PATH.
    SearchPath(&'static str),
}

impl DiscoveryStrategy {
    fn candidates(&self, host: &dyn HostEnvironment) -> Vec<(String, Option<PathBuf>)> {
        match self {
            DiscoveryStrategy::Explicit(path) => {
                vec![(path.display().to_string(), Some(path.clone()))]
            }
            DiscoveryStrategy::EnvVar(key) => match host.var(key) {
                Some(value) if !value.is_empty() => {
                    let path = PathBuf::from(value);
                    vec![(format!("${}={}", key, path.display()), Some(path))]
                }
                _ => vec![(format!("${} (unset)", key), None)],
            },
            DiscoveryStrategy::WellKnown(paths) => paths
                .iter()
                .map(|p| (p.display().to_string(), Some(p.clone())))
                .collect(),
            DiscoveryStrategy::SearchPath(program) => {
                vec![(format!("PATH lookup for {}", program), host.search_path(program))]
            }
        }
    }
}

/// Well-known ffmpeg install locations for the host platform.
pub fn ffmpeg_well_known_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/ffmpeg/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

pub fn ytdlp_well_known_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        vec![PathBuf::from("C:\\yt-dlp\\yt-dlp.exe")]
    }

    #[cfg(not(target_os = "windows"))]
    {
        vec![
            PathBuf::from("/usr/local/bin/yt-dlp"),
            PathBuf::from("/usr/bin/yt-dlp"),
            PathBuf::from("/opt/homebrew/bin/yt-dlp"),
        ]
    }
}

/// Finds an external executable once and caches it for the lifetime of the locator.
///
/// Only successful results are cached, so a tool installed after a failed lookup is picked up
/// on the next call. Scans are serialized; concurrent first callers share one scan.
pub struct ToolLocator {
    tool: &'static str,
    strategies: Vec<DiscoveryStrategy>,
    host: Box<dyn HostEnvironment>,
    cache: OnceLock<PathBuf>,
    scan_lock: Mutex<()>,
    scans: AtomicUsize,
}

impl std::fmt::Debug for ToolLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolLocator")
            .field("tool", &self.tool)
            .field("strategies", &self.strategies)
            .field("cached", &self.cache.get())
            .finish()
    }
}

impl ToolLocator {
    pub fn new(
        tool: &'static str,
        strategies: Vec<DiscoveryStrategy>,
        host: Box<dyn HostEnvironment>,
    ) -> Self {
        Self {
            tool,
            strategies,
            host,
            cache: OnceLock::new(),
            scan_lock: Mutex::new(()),
            scans: AtomicUsize::new(0),
        }
    }

    /// ffmpeg: configured path, `FFMPEG_PATH`, well-known paths, then PATH.
    pub fn ffmpeg(explicit: Option<PathBuf>) -> Self {
        let mut strategies = Vec::with_capacity(4);
        if let Some(path) = explicit {
            strategies.push(DiscoveryStrategy::Explicit(path));
        }
        strategies.push(DiscoveryStrategy::EnvVar("FFMPEG_PATH"));
        strategies.push(DiscoveryStrategy::WellKnown(ffmpeg_well_known_paths()));
        strategies.push(DiscoveryStrategy::SearchPath("ffmpeg"));
        Self::new("ffmpeg", strategies, Box::new(SystemHost))
    }

    /// yt-dlp: configured path, `YTDLP_PATH`, PATH, then well-known paths.
    pub fn ytdlp(explicit: Option<PathBuf>) -> Self {
        let mut strategies = Vec::with_capacity(4);
        if let Some(path) = explicit {
            strategies.push(DiscoveryStrategy::Explicit(path));
        }
        strategies.push(DiscoveryStrategy::EnvVar("YTDLP_PATH"));
        strategies.push(DiscoveryStrategy::SearchPath("yt-dlp"));
        strategies.push(DiscoveryStrategy::WellKnown(ytdlp_well_known_paths()));
        Self::new("yt-dlp", strategies, Box::new(SystemHost))
    }

    pub fn tool(&self) -> &'static str {
        self.tool
    }

    /// Cached path, if a previous `locate` succeeded. Never scans.
    pub fn cached(&self) -> Option<&Path> {
        self.cache.get().map(PathBuf::as_path)
    }

    /// Number of full scans performed so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    pub fn locate(&self) -> Result<PathBuf, AppError> {
        if let Some(path) = self.cache.get() {
            log::trace!(
                target: "lofi::codec::discovery",
                "{} path (cached): {}",
                self.tool,
                path.display()
            );
            return Ok(path.clone());
        }

        let _guard = self.scan_lock.lock();
        if let Some(path) = self.cache.get() {
            return Ok(path.clone());
        }

        let found = self.scan()?;
        let _ = self.cache.set(found.clone());
        Ok(found)
    }

    fn scan(&self) -> Result<PathBuf, AppError> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let mut attempted = Vec::new();

        for strategy in &self.strategies {
            for (label, candidate) in strategy.candidates(self.host.as_ref()) {
                attempted.push(label);
                let Some(path) = candidate else {
                    continue;
                };
                if self.accept(&path) {
                    let path = std::path::absolute(&path).unwrap_or(path);
                    log::debug!(
                        target: "lofi::codec::discovery",
                        "{} found via {:?}: {}",
                        self.tool,
                        strategy_name(strategy),
                        path.display()
                    );
                    return Ok(path);
                }
            }
        }

        log::error!(
            target: "lofi::codec::discovery",
            "{} not found; tried {}",
            self.tool,
            attempted.join(", ")
        );
        Err(AppError::ToolNotFound {
            tool: self.tool.to_string(),
            attempted,
        })
    }

    fn accept(&self, path: &Path) -> bool {
        if !self.host.is_file(path) {
            return false;
        }
        if self.host.is_executable(path) {
            return true;
        }
        match self.host.mark_executable(path) {
            Ok(()) => log::info!(
                target: "lofi::codec::discovery",
                "Marked {} executable",
                path.display()
            ),
            Err(e) => log::warn!(
                target: "lofi::codec::discovery",
                "{} is not executable and chmod failed: {}",
                path.display(),
                e
            ),
        }
        self.host.is_executable(path)
    }
}

fn strategy_name(strategy: &DiscoveryStrategy) -> &'static str {
    match strategy {
        DiscoveryStrategy::Explicit(_) => "configured path",
        DiscoveryStrategy::EnvVar(_) => "environment",
        DiscoveryStrategy::WellKnown(_) => "well-known path",
        DiscoveryStrategy::SearchPath(_) => "PATH",
    }
}
