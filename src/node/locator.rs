//! Reference binary discovery
//!
//! Search order: explicit override, versioned binary cache, conventional
//! source/install directories, then the executable search path. The first
//! directory holding both the daemon and the CLI wins. Probing is read-only.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LocatorConfig;

/// Daemon executable name
pub const DAEMON_NAME: &str = "bitcoind";
/// CLI executable name
pub const CLI_NAME: &str = "bitcoin-cli";

/// Layouts probed inside each candidate directory, most specific first
const LAYOUTS: [&str; 4] = ["build/bin", "src", "bin", ""];

/// Locator errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("reference binaries not found (searched {} locations)", .searched.len())]
    BinaryNotFound { searched: Vec<PathBuf> },

    #[error("not an executable file: {0:?}")]
    NotExecutable(PathBuf),
}

/// Where a binary pair was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSource {
    Override,
    Cache,
    Conventional,
    SystemPath,
}

/// Located daemon and CLI executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPaths {
    pub daemon: PathBuf,
    pub cli: PathBuf,
    /// Version label taken from the cache sub-directory name, if any
    pub version: Option<String>,
    pub source: LocationSource,
}

impl BinaryPaths {
    /// Re-check that both executables still exist and are executable
    pub fn verify(&self) -> Result<(), LocatorError> {
        for path in [&self.daemon, &self.cli] {
            if !is_executable(path) {
                return Err(LocatorError::NotExecutable(path.clone()));
            }
        }
        Ok(())
    }
}

/// Finds reference binaries according to [`LocatorConfig`]
#[derive(Debug, Clone)]
pub struct NodeLocator {
    config: LocatorConfig,
    home: Option<PathBuf>,
}

impl NodeLocator {
    pub fn new(config: &LocatorConfig) -> Self {
        Self {
            config: config.clone(),
            home: dirs::home_dir(),
        }
    }

    /// Override the home directory used for conventional paths
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Find the first usable daemon/CLI pair
    pub fn locate(&self) -> Result<BinaryPaths, LocatorError> {
        let mut searched = Vec::new();

        if let Some(core_path) = &self.config.core_path {
            if let Some(found) = probe_dir(core_path, &mut searched) {
                return Ok(self.found(found, None, LocationSource::Override));
            }
            debug!("Override path {:?} holds no reference binaries", core_path);
        }

        if let Some(cache_dir) = &self.config.cache_dir {
            for (dir, version) in cache_candidates(cache_dir) {
                if let Some(found) = probe_dir(&dir, &mut searched) {
                    return Ok(self.found(found, version, LocationSource::Cache));
                }
            }
        }

        for dir in self.conventional_dirs() {
            if let Some(found) = probe_dir(&dir, &mut searched) {
                return Ok(self.found(found, None, LocationSource::Conventional));
            }
        }

        if !self.config.skip_system_path {
            if let (Ok(daemon), Ok(cli)) = (which::which(DAEMON_NAME), which::which(CLI_NAME)) {
                return Ok(self.found((daemon, cli), None, LocationSource::SystemPath));
            }
            searched.push(PathBuf::from("$PATH"));
        }

        debug!("Reference binaries not found in {} locations", searched.len());
        Err(LocatorError::BinaryNotFound { searched })
    }

    fn found(
        &self,
        (daemon, cli): (PathBuf, PathBuf),
        version: Option<String>,
        source: LocationSource,
    ) -> BinaryPaths {
        info!(
            "Found reference binaries at {:?} ({:?}{})",
            daemon,
            source,
            version
                .as_deref()
                .map(|v| format!(", version {}", v))
                .unwrap_or_default()
        );
        BinaryPaths {
            daemon,
            cli,
            version,
            source,
        }
    }

    /// Conventional directories in search order
    pub fn conventional_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if !self.config.skip_conventional_paths {
            if let Some(home) = &self.home {
                for rel in ["src/bitcoin", "src/bitcoin-core", "src/core"] {
                    dirs.push(home.join(rel));
                }
            }
            dirs.push(PathBuf::from("/usr/local/src/bitcoin"));
            dirs.push(PathBuf::from("/opt/bitcoin"));
            dirs.extend(sorted_subdirs(Path::new("/opt/bitcoin-core/binaries")));
        }
        dirs.extend(self.config.extra_search_paths.iter().cloned());
        dirs
    }
}

/// Cache candidates: the cache root itself, then version sub-directories newest first
fn cache_candidates(cache_dir: &Path) -> Vec<(PathBuf, Option<String>)> {
    let mut candidates = vec![(cache_dir.to_path_buf(), None)];
    for dir in sorted_subdirs(cache_dir) {
        let version = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        candidates.push((dir, version));
    }
    candidates
}

/// Sub-directories ordered by descending numeric version components
fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort_by_cached_key(|path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        std::cmp::Reverse((version_key(&name), name))
    });
    dirs
}

/// Numeric components of a version-like name ("v27.0" -> [27, 0])
pub(crate) fn version_key(name: &str) -> Vec<u64> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// Probe the known layouts of `dir` for a daemon/CLI pair
fn probe_dir(dir: &Path, searched: &mut Vec<PathBuf>) -> Option<(PathBuf, PathBuf)> {
    if !dir.is_dir() {
        return None;
    }
    for layout in LAYOUTS {
        let base = if layout.is_empty() {
            dir.to_path_buf()
        } else {
            dir.join(layout)
        };
        searched.push(base.clone());
        let daemon = base.join(DAEMON_NAME);
        let cli = base.join(CLI_NAME);
        if is_executable(&daemon) && is_executable(&cli) {
            return Some((daemon, cli));
        }
    }
    None
}

/// File exists and (on Unix) has an executable bit set
pub fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}
