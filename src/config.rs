//! garrison configuration file.
//!
//! Settings come from three layers, later ones winning:
//! built-in defaults → `garrison.toml` → `GARRISON_*` environment variables.
//!
//! # Configuration File Format
//!
//! ```toml
//! [fetch]
//! binary = "steamcmd"
//! retries = 3
//! backoff_ms = 1000
//! stream = true
//! timeout_secs = 3600
//!
//! [container]
//! runtime = "podman"
//! engine = "cli"
//! fetch_image = "steamcmd/steamcmd:latest"
//! server_image = "debian:bookworm-slim"
//!
//! [service]
//! update_on_start = true
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::fetch::FetchConfig;

/// Which interface drives the server container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Shell out to the `docker`/`podman` CLI.
    #[default]
    Cli,
    /// Docker Engine HTTP API.
    Api,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Cli => write!(f, "cli"),
            EngineKind::Api => write!(f, "api"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cli" => Ok(EngineKind::Cli),
            "api" => Ok(EngineKind::Api),
            _ => Err(ConfigError::UnknownEngine(s.to_string())),
        }
    }
}

fn default_binary() -> String {
    "steamcmd".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_fetch_image() -> String {
    "steamcmd/steamcmd:latest".to_string()
}

fn default_server_image() -> String {
    "debian:bookworm-slim".to_string()
}

/// `[fetch]`: SteamCMD client settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Stream output line by line while the tool runs.
    #[serde(default = "default_true")]
    pub stream: bool,
    /// Per-attempt timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            username: None,
            password: None,
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            stream: true,
            timeout_secs: None,
        }
    }
}

impl fmt::Debug for FetchSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchSection")
            .field("binary", &self.binary)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("retries", &self.retries)
            .field("backoff_ms", &self.backoff_ms)
            .field("stream", &self.stream)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl FetchSection {
    /// Client configuration without an output sink.
    pub fn client_config(&self) -> FetchConfig {
        FetchConfig {
            binary: self.binary.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            retries: self.retries,
            backoff: Duration::from_millis(self.backoff_ms),
            stream: self.stream,
            attempt_timeout: self.timeout_secs.map(Duration::from_secs),
            on_output: None,
            output_prefix: String::new(),
        }
    }
}

/// `[container]`: runtime and image selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSection {
    /// `docker` or `podman`.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(default = "default_fetch_image")]
    pub fetch_image: String,
    #[serde(default = "default_server_image")]
    pub server_image: String,
    /// Overrides `$XDG_CACHE_HOME/garrison/steamcmd`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            engine: EngineKind::Cli,
            fetch_image: default_fetch_image(),
            server_image: default_server_image(),
            cache_dir: None,
        }
    }
}

/// `[service]`: systemd unit behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Run an app update in `ExecStartPre` before every launch.
    #[serde(default = "default_true")]
    pub update_on_start: bool,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            update_on_start: true,
        }
    }
}

/// Root of `garrison.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarrisonToml {
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub container: ContainerSection,
    #[serde(default)]
    pub service: ServiceSection,
}

impl GarrisonToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse configuration from a TOML string; `origin` names it in errors.
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load from `path`, or the defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Overlay `GARRISON_*` variables. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(bin) = get("GARRISON_STEAMCMD_BIN") {
            self.fetch.binary = bin;
        }
        if let Some(user) = get("GARRISON_STEAMCMD_USERNAME") {
            self.fetch.username = Some(user);
        }
        if let Some(pass) = get("GARRISON_STEAMCMD_PASSWORD") {
            self.fetch.password = Some(pass);
        }
        if let Some(runtime) = get("GARRISON_CONTAINER_RUNTIME") {
            self.container.runtime = runtime.trim().to_string();
        }
        if let Some(engine) = get("GARRISON_CONTAINER_ENGINE") {
            self.container.engine = engine.parse()?;
        }
        if let Some(image) = get("GARRISON_STEAMCMD_IMAGE") {
            self.container.fetch_image = image;
        }
        if let Some(image) = get("GARRISON_SERVER_IMAGE") {
            self.container.server_image = image;
        }
        if let Some(cache) = get("GARRISON_STEAMCMD_CACHE") {
            self.container.cache_dir = Some(PathBuf::from(cache));
        }
        Ok(())
    }

    /// Defaults, then `path` if present, then the environment from `lookup`.
    pub fn load_layered(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Non-fatal problems worth telling the user about.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.fetch.retries == 0 {
            warnings.push("fetch.retries is 0; treated as a single attempt".to_string());
        }
        if self.fetch.password.is_some() && self.fetch.username.is_none() {
            warnings.push(
                "fetch.password is set without fetch.username; login stays anonymous".to_string(),
            );
        }
        if self.fetch.timeout_secs == Some(0) {
            warnings.push("fetch.timeout_secs is 0; every attempt will time out".to_string());
        }
        if !matches!(self.container.runtime.as_str(), "docker" | "podman") {
            warnings.push(format!(
                "container.runtime '{}' is neither docker nor podman",
                self.container.runtime
            ));
        }

        warnings
    }

    /// TOML rendering with the password masked.
    pub fn to_display_toml(&self) -> String {
        let mut shown = self.clone();
        if shown.fetch.password.is_some() {
            shown.fetch.password = Some("***".to_string());
        }
        toml::to_string_pretty(&shown).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = GarrisonToml::default();
        assert_eq!(config.fetch.binary, "steamcmd");
        assert_eq!(config.fetch.retries, 3);
        assert_eq!(config.fetch.backoff_ms, 1000);
        assert!(config.fetch.stream);
        assert_eq!(config.container.runtime, "docker");
        assert_eq!(config.container.engine, EngineKind::Cli);
        assert_eq!(config.container.fetch_image, "steamcmd/steamcmd:latest");
        assert_eq!(config.container.server_image, "debian:bookworm-slim");
        assert!(config.service.update_on_start);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let content = r#"
[fetch]
retries = 5

[container]
engine = "api"
"#;
        let config = GarrisonToml::parse(content, Path::new("garrison.toml")).unwrap();
        assert_eq!(config.fetch.retries, 5);
        assert_eq!(config.fetch.backoff_ms, 1000);
        assert_eq!(config.container.engine, EngineKind::Api);
        assert_eq!(config.container.runtime, "docker");
    }

    #[test]
    fn malformed_file_error_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garrison.toml");
        std::fs::write(&path, "[fetch\nretries = ").unwrap();
        let err = GarrisonToml::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("garrison.toml"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = GarrisonToml::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, GarrisonToml::default());
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garrison.toml");
        std::fs::write(&path, "[fetch]\nbinary = \"/opt/steamcmd\"\n").unwrap();

        let config = GarrisonToml::load_layered(
            &path,
            env(&[
                ("GARRISON_STEAMCMD_BIN", "/usr/local/bin/steamcmd"),
                ("GARRISON_CONTAINER_RUNTIME", "podman"),
                ("GARRISON_STEAMCMD_IMAGE", "registry/steamcmd:1"),
                ("GARRISON_SERVER_IMAGE", "ubuntu:24.04"),
                ("GARRISON_STEAMCMD_CACHE", "/srv/cache"),
                ("GARRISON_STEAMCMD_USERNAME", "op"),
                ("GARRISON_CONTAINER_ENGINE", "api"),
            ]),
        )
        .unwrap();

        assert_eq!(config.fetch.binary, "/usr/local/bin/steamcmd");
        assert_eq!(config.fetch.username.as_deref(), Some("op"));
        assert_eq!(config.container.runtime, "podman");
        assert_eq!(config.container.fetch_image, "registry/steamcmd:1");
        assert_eq!(config.container.server_image, "ubuntu:24.04");
        assert_eq!(config.container.cache_dir, Some(PathBuf::from("/srv/cache")));
        assert_eq!(config.container.engine, EngineKind::Api);
    }

    #[test]
    fn empty_environment_values_are_ignored() {
        let mut config = GarrisonToml::default();
        config
            .apply_env(env(&[("GARRISON_STEAMCMD_BIN", "  ")]))
            .unwrap();
        assert_eq!(config.fetch.binary, "steamcmd");
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let mut config = GarrisonToml::default();
        let err = config
            .apply_env(env(&[("GARRISON_CONTAINER_ENGINE", "k8s")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEngine(_)));
    }

    #[test]
    fn validate_flags_password_without_username() {
        let mut config = GarrisonToml::default();
        config.fetch.password = Some("secret".to_string());
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("anonymous")));
    }

    #[test]
    fn display_and_debug_mask_password() {
        let mut config = GarrisonToml::default();
        config.fetch.username = Some("op".to_string());
        config.fetch.password = Some("hunter2".to_string());
        assert!(!config.to_display_toml().contains("hunter2"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn client_config_carries_timing() {
        let mut section = FetchSection::default();
        section.backoff_ms = 250;
        section.timeout_secs = Some(30);
        let client = section.client_config();
        assert_eq!(client.backoff, Duration::from_millis(250));
        assert_eq!(client.attempt_timeout, Some(Duration::from_secs(30)));
        assert_eq!(client.retries, 3);
    }
}
