//! Core identifiers shared by every backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// How a managed server is executed on the host.
///
/// Persisted per server key; a server keeps its mode until it is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Plain host process tracked through a PID file.
    #[default]
    None,
    /// `systemd --user` unit.
    Service,
    /// OCI container via docker/podman.
    Container,
}

impl IsolationMode {
    pub const ALL: [IsolationMode; 3] = [
        IsolationMode::None,
        IsolationMode::Service,
        IsolationMode::Container,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::None => "none",
            IsolationMode::Service => "service",
            IsolationMode::Container => "container",
        }
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "direct" => Ok(IsolationMode::None),
            "service" | "systemd" => Ok(IsolationMode::Service),
            "container" => Ok(IsolationMode::Container),
            _ => Err(ConfigError::UnknownIsolation(s.to_string())),
        }
    }
}

/// Stable identifier of a managed server, e.g. `arma-reforger`.
///
/// Restricted to `[A-Za-z0-9._-]` because it is embedded in file names, unit
/// names and container names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerKey(String);

impl ServerKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ConfigError> {
        let key = key.into();
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(Self(key))
        } else {
            Err(ConfigError::InvalidServerKey(key))
        }
    }

    /// Key of a built-in definition. The literal must follow the same rules as [`ServerKey::new`].
    pub(crate) fn builtin(key: &'static str) -> Self {
        debug_assert!(ServerKey::new(key).is_ok(), "invalid built-in key {key}");
        Self(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn pid_file_name(&self) -> String {
        format!("{}.pid", self.0)
    }

    pub fn container_name(&self) -> String {
        format!("garrison-{}", self.0)
    }

    pub fn unit_name(&self) -> String {
        format!("garrison-{}.service", self.0)
    }

    /// Name of the throwaway unit that runs the fetch tool.
    pub fn transient_unit_name(&self) -> String {
        format!("garrison-scmd-{}", self.0)
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServerKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerKey::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_mode_parses_names_and_aliases() {
        assert_eq!("none".parse::<IsolationMode>().unwrap(), IsolationMode::None);
        assert_eq!("direct".parse::<IsolationMode>().unwrap(), IsolationMode::None);
        assert_eq!(
            "Service".parse::<IsolationMode>().unwrap(),
            IsolationMode::Service
        );
        assert_eq!(
            "systemd".parse::<IsolationMode>().unwrap(),
            IsolationMode::Service
        );
        assert_eq!(
            "container".parse::<IsolationMode>().unwrap(),
            IsolationMode::Container
        );
    }

    #[test]
    fn isolation_mode_rejects_unknown() {
        let err = "bogus".parse::<IsolationMode>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownIsolation(ref s) if s == "bogus"));
    }

    #[test]
    fn isolation_mode_display_round_trips() {
        for mode in IsolationMode::ALL {
            assert_eq!(mode.to_string().parse::<IsolationMode>().unwrap(), mode);
        }
    }

    #[test]
    fn isolation_mode_serializes_lowercase() {
        let json = serde_json::to_string(&IsolationMode::Container).unwrap();
        assert_eq!(json, "\"container\"");
    }

    #[test]
    fn server_key_derives_names() {
        let key = ServerKey::new("arma-reforger").unwrap();
        assert_eq!(key.pid_file_name(), "arma-reforger.pid");
        assert_eq!(key.container_name(), "garrison-arma-reforger");
        assert_eq!(key.unit_name(), "garrison-arma-reforger.service");
        assert_eq!(key.transient_unit_name(), "garrison-scmd-arma-reforger");
    }

    #[test]
    fn server_key_rejects_unsafe_values() {
        for bad in ["", "a/b", "a b", "..", ".hidden", "x;rm"] {
            assert!(ServerKey::new(bad).is_err(), "accepted {:?}", bad);
        }
        assert!(ServerKey::new("game_01.v2").is_ok());
    }
}
