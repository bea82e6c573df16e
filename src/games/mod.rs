//! Game definitions: what to fetch and how to launch it.

pub mod reforger;

use std::path::{Path, PathBuf};

use crate::errors::BackendError;
use crate::paths::{ServerPaths, absolute};
use crate::types::ServerKey;

pub use reforger::ArmaReforger;

/// Mount point of the install directory inside a server container.
pub const CONTAINER_DATA_DIR: &str = "/data";

/// Options for launching a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    /// Server config file; defaults to `<install>/profiles/config.json`.
    pub config: Option<PathBuf>,
    /// Profile directory for logs and saves; defaults to `<install>/profiles`.
    pub profile: Option<PathBuf>,
    pub port: u16,
    pub query_port: u16,
    pub browser_port: u16,
    pub extra: Vec<String>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            config: None,
            profile: None,
            port: 20001,
            query_port: 27016,
            browser_port: 17777,
            extra: Vec::new(),
        }
    }
}

impl StartOptions {
    /// Split a free-form `--extra` string on whitespace.
    pub fn with_extra(mut self, extra: &str) -> Self {
        self.extra = extra.split_whitespace().map(str::to_string).collect();
        self
    }
}

/// Resolved paths the server binary is launched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPaths {
    pub executable: PathBuf,
    pub config: PathBuf,
    pub profile: PathBuf,
}

impl LaunchPaths {
    /// Host paths for a server installed into `install_dir`.
    pub fn direct(game: &dyn GameDefinition, install_dir: &Path, opts: &StartOptions) -> Self {
        let install_dir = absolute(install_dir);
        let profiles = install_dir.join("profiles");
        Self {
            executable: install_dir.join(game.binary_name()),
            config: opts
                .config
                .as_deref()
                .map(absolute)
                .unwrap_or_else(|| profiles.join("config.json")),
            profile: opts.profile.as_deref().map(absolute).unwrap_or(profiles),
        }
    }

    /// Paths inside the per-server XDG layout used by unit-managed servers.
    pub fn for_service(game: &dyn GameDefinition, paths: &ServerPaths, opts: &StartOptions) -> Self {
        Self {
            executable: paths.app.join(game.binary_name()),
            config: opts
                .config
                .as_deref()
                .map(absolute)
                .unwrap_or_else(|| paths.config.clone()),
            profile: opts
                .profile
                .as_deref()
                .map(absolute)
                .unwrap_or_else(|| paths.profiles.clone()),
        }
    }

    /// Re-root every path from `install_dir` to [`CONTAINER_DATA_DIR`].
    pub fn in_container(&self, install_dir: &Path) -> Result<Self, BackendError> {
        let install_dir = absolute(install_dir);
        let map = |path: &Path| -> Result<PathBuf, BackendError> {
            let path = absolute(path);
            path.strip_prefix(&install_dir)
                .map(|rel| Path::new(CONTAINER_DATA_DIR).join(rel))
                .map_err(|_| BackendError::UnmappablePath {
                    path: path.clone(),
                    install_dir: install_dir.clone(),
                })
        };
        Ok(Self {
            executable: map(&self.executable)?,
            config: map(&self.config)?,
            profile: map(&self.profile)?,
        })
    }
}

/// A dedicated server that can be fetched with SteamCMD.
pub trait GameDefinition: Send + Sync {
    fn key(&self) -> &ServerKey;

    fn display_name(&self) -> &str;

    /// Steam app id of the dedicated server.
    fn app_id(&self) -> u32;

    /// Executable name relative to the install directory.
    fn binary_name(&self) -> &str;

    fn launch_args(&self, paths: &LaunchPaths, opts: &StartOptions) -> Vec<String>;

    /// UDP ports the server listens on, published 1:1 by containers.
    fn udp_ports(&self, opts: &StartOptions) -> Vec<u16>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::BaseDirs;

    #[test]
    fn direct_paths_default_under_install_dir() {
        let game = ArmaReforger::new();
        let paths = LaunchPaths::direct(&game, Path::new("/srv/arma"), &StartOptions::default());
        assert_eq!(paths.executable, PathBuf::from("/srv/arma/ArmaReforgerServer"));
        assert_eq!(paths.config, PathBuf::from("/srv/arma/profiles/config.json"));
        assert_eq!(paths.profile, PathBuf::from("/srv/arma/profiles"));
    }

    #[test]
    fn explicit_options_override_defaults() {
        let game = ArmaReforger::new();
        let opts = StartOptions {
            config: Some(PathBuf::from("/etc/arma/server.json")),
            profile: Some(PathBuf::from("/var/arma")),
            ..StartOptions::default()
        };
        let paths = LaunchPaths::direct(&game, Path::new("/srv/arma"), &opts);
        assert_eq!(paths.config, PathBuf::from("/etc/arma/server.json"));
        assert_eq!(paths.profile, PathBuf::from("/var/arma"));
    }

    #[test]
    fn service_paths_use_xdg_layout() {
        let game = ArmaReforger::new();
        let layout = BaseDirs::under(Path::new("/t")).server(game.key());
        let paths = LaunchPaths::for_service(&game, &layout, &StartOptions::default());
        assert_eq!(paths.executable, layout.app.join("ArmaReforgerServer"));
        assert_eq!(paths.config, layout.config);
        assert_eq!(paths.profile, layout.profiles);
    }

    #[test]
    fn container_mapping_rewrites_prefix() {
        let game = ArmaReforger::new();
        let host = LaunchPaths::direct(&game, Path::new("/srv/arma"), &StartOptions::default());
        let inside = host.in_container(Path::new("/srv/arma")).unwrap();
        assert_eq!(inside.executable, PathBuf::from("/data/ArmaReforgerServer"));
        assert_eq!(inside.config, PathBuf::from("/data/profiles/config.json"));
        assert_eq!(inside.profile, PathBuf::from("/data/profiles"));
    }

    #[test]
    fn container_mapping_rejects_outside_paths() {
        let game = ArmaReforger::new();
        let opts = StartOptions {
            config: Some(PathBuf::from("/etc/arma/server.json")),
            ..StartOptions::default()
        };
        let host = LaunchPaths::direct(&game, Path::new("/srv/arma"), &opts);
        let err = host.in_container(Path::new("/srv/arma")).unwrap_err();
        match err {
            BackendError::UnmappablePath { path, .. } => {
                assert_eq!(path, PathBuf::from("/etc/arma/server.json"))
            }
            other => panic!("Expected UnmappablePath, got {:?}", other),
        }
    }

    #[test]
    fn sibling_prefix_is_not_inside() {
        let game = ArmaReforger::new();
        let opts = StartOptions {
            profile: Some(PathBuf::from("/srv/arma-old/profiles")),
            ..StartOptions::default()
        };
        let host = LaunchPaths::direct(&game, Path::new("/srv/arma"), &opts);
        assert!(host.in_container(Path::new("/srv/arma")).is_err());
    }

    #[test]
    fn extra_is_split_on_whitespace() {
        let opts = StartOptions::default().with_extra("  -maxFPS 60   -logStats 1000 ");
        assert_eq!(opts.extra, vec!["-maxFPS", "60", "-logStats", "1000"]);
    }
}
