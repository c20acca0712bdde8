//! Per-request temporary storage.
//!
//! Every request gets its own area `<root>/req-<uuid>/` under a shared root. Paths are
//! registered as they are produced and deleted in reverse order when the scope is released,
//! explicitly or on drop.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

const AREA_PREFIX: &str = "req-";

#[derive(Debug, Clone)]
pub struct ArtifactManager {
    root: PathBuf,
}

impl ArtifactManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<system temp>/lofi-converter`.
    pub fn system_default() -> Self {
        Self::new(std::env::temp_dir().join("lofi-converter"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire a scope for one request. Nothing touches the filesystem until the first
    /// `area`/`allocate` call.
    pub fn scope(&self) -> ArtifactScope {
        ArtifactScope {
            root: self.root.clone(),
            id: Uuid::new_v4().simple().to_string(),
            area: None,
            registered: Vec::new(),
        }
    }

    /// Remove request areas older than `max_age`, left behind by a process that died mid-request.
    /// Returns the number of areas removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return 0,
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_str().is_some_and(|n| n.starts_with(AREA_PREFIX)) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if now.duration_since(modified).unwrap_or_default() <= max_age {
                continue;
            }
            let path = entry.path();
            if remove_path(&path).is_ok() {
                log::info!(
                    target: "lofi::artifacts",
                    "Removed stale request area {}",
                    path.display()
                );
                removed += 1;
            }
        }
        removed
    }
}

/// Outcome of releasing a scope.
#[derive(Debug, Default)]
pub struct ReleaseSummary {
    pub removed: usize,
    pub missing: usize,
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl ReleaseSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Temporary paths owned by one request.
#[derive(Debug)]
pub struct ArtifactScope {
    root: PathBuf,
    id: String,
    area: Option<PathBuf>,
    registered: Vec<PathBuf>,
}

impl ArtifactScope {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True while nothing has been created or registered.
    pub fn is_untouched(&self) -> bool {
        self.registered.is_empty()
    }

    pub fn registered(&self) -> &[PathBuf] {
        &self.registered
    }

    /// The request's private directory, created on first use.
    pub fn area(&mut self) -> io::Result<PathBuf> {
        if let Some(area) = &self.area {
            return Ok(area.clone());
        }
        let area = self.root.join(format!("{}{}", AREA_PREFIX, self.id));
        fs::create_dir_all(&area)?;
        self.registered.push(area.clone());
        self.area = Some(area.clone());
        log::trace!(
            target: "lofi::artifacts",
            "Created request area {}",
            area.display()
        );
        Ok(area)
    }

    /// A registered path named `name` inside the area. The file itself is not created.
    pub fn allocate(&mut self, name: &str) -> io::Result<PathBuf> {
        let path = self.area()?.join(name);
        self.register(path.clone());
        Ok(path)
    }

    /// Track a path produced by a collaborator so it is deleted on release.
    pub fn register(&mut self, path: PathBuf) {
        if !self.registered.contains(&path) {
            self.registered.push(path);
        }
    }

    /// Delete one path early. A path that is already gone is not an error.
    pub fn release(&mut self, path: &Path) -> io::Result<()> {
        self.registered.retain(|p| p != path);
        match remove_path(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Delete every registered path, newest first. Missing paths are counted, not reported.
    pub fn release_all(&mut self) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();
        while let Some(path) = self.registered.pop() {
            match remove_path(&path) {
                Ok(()) => summary.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => summary.missing += 1,
                Err(e) => {
                    log::warn!(
                        target: "lofi::artifacts",
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    );
                    summary.failed.push((path, e));
                }
            }
        }
        self.area = None;
        summary
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        if !self.registered.is_empty() {
            let _ = self.release_all();
        }
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
