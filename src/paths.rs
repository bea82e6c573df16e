//! Per-user base directories and per-server path layout.
//!
//! Roots follow the XDG base-directory rules and are resolved when an operation
//! runs, not at startup. Relative or empty `XDG_*_HOME` values are ignored.

use std::path::{Path, PathBuf};

use crate::errors::PathError;
use crate::types::ServerKey;

const APP_DIR: &str = "garrison";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseDirs {
    pub data: PathBuf,
    pub cache: PathBuf,
    pub state: PathBuf,
    pub config: PathBuf,
}

impl BaseDirs {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, PathError> {
        Self::from_lookup(|name| std::env::var(name).ok(), dirs::home_dir())
    }

    /// Resolve from an arbitrary variable lookup and home directory.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        home: Option<PathBuf>,
    ) -> Result<Self, PathError> {
        let xdg = |name: &str| {
            lookup(name)
                .map(PathBuf::from)
                .filter(|p| p.is_absolute())
        };
        let fallback = |parts: &[&str]| -> Result<PathBuf, PathError> {
            let mut path = home.clone().ok_or(PathError::NoHomeDir)?;
            path.extend(parts);
            Ok(path)
        };

        Ok(Self {
            data: match xdg("XDG_DATA_HOME") {
                Some(p) => p,
                None => fallback(&[".local", "share"])?,
            },
            cache: match xdg("XDG_CACHE_HOME") {
                Some(p) => p,
                None => fallback(&[".cache"])?,
            },
            state: match xdg("XDG_STATE_HOME") {
                Some(p) => p,
                None => fallback(&[".local", "state"])?,
            },
            config: match xdg("XDG_CONFIG_HOME") {
                Some(p) => p,
                None => fallback(&[".config"])?,
            },
        })
    }

    /// All four roots as subdirectories of `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            data: root.join("data"),
            cache: root.join("cache"),
            state: root.join("state"),
            config: root.join("config"),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config.join(APP_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("garrison.toml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.config_dir().join("state.json")
    }

    /// Shared fetch-tool cache.
    pub fn fetch_cache(&self) -> PathBuf {
        self.cache.join(APP_DIR).join("steamcmd")
    }

    pub fn server(&self, key: &ServerKey) -> ServerPaths {
        let base = self.data.join(APP_DIR).join(key.as_str());
        let profiles = base.join("profiles");
        let unit_dir = self.config.join("systemd").join("user");
        let logs = self.state.join(APP_DIR).join(key.as_str());
        ServerPaths {
            app: base.join("app"),
            config: profiles.join("config.json"),
            profiles,
            base,
            pid_file: self.data.join(APP_DIR).join(key.pid_file_name()),
            server_log: logs.join("server.log"),
            logs,
            cache: self.fetch_cache(),
            unit: unit_dir.join(key.unit_name()),
            unit_dir,
        }
    }
}

/// Where base directories come from.
#[derive(Debug, Clone, Default)]
pub enum DirsSource {
    /// Read `XDG_*` and `HOME` each time paths are needed.
    #[default]
    Environment,
    Fixed(BaseDirs),
}

impl DirsSource {
    pub fn resolve(&self) -> Result<BaseDirs, PathError> {
        match self {
            DirsSource::Environment => BaseDirs::from_env(),
            DirsSource::Fixed(dirs) => Ok(dirs.clone()),
        }
    }
}

/// Layout of everything garrison keeps for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPaths {
    /// `$XDG_DATA_HOME/garrison/<key>`
    pub base: PathBuf,
    pub app: PathBuf,
    pub profiles: PathBuf,
    pub config: PathBuf,
    /// `$XDG_DATA_HOME/garrison/<key>.pid`
    pub pid_file: PathBuf,
    /// `$XDG_STATE_HOME/garrison/<key>`
    pub logs: PathBuf,
    pub server_log: PathBuf,
    /// `$XDG_CACHE_HOME/garrison/steamcmd`
    pub cache: PathBuf,
    pub unit_dir: PathBuf,
    pub unit: PathBuf,
}

/// Make `path` absolute against the current directory without touching the filesystem.
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
