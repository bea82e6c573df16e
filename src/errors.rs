//! Typed error hierarchy for garrison.
//!
//! One enum per subsystem:
//! - `FetchError`: SteamCMD client and its runners
//! - `ExecError`: control CLIs (`systemctl`, `docker`/`podman`)
//! - `ProcessError`: direct-mode PID file lifecycle
//! - `BackendError`: any isolation backend operation
//! - `DispatchError`: registry lookup, mode resolution and dispatch
//! - `ConfigError` / `StateError`: on-disk configuration and persisted state

use std::path::PathBuf;

use thiserror::Error;

use crate::types::IsolationMode;

/// Why an external call stopped before it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Errors from the SteamCMD fetch client.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch tool '{bin}' not found; install it or set GARRISON_STEAMCMD_BIN")]
    BinaryNotFound { bin: String },

    #[error("failed to spawn fetch tool '{bin}': {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for fetch tool '{bin}': {source}")]
    Wait {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch tool reported no success after {attempts} attempt(s): {detail}")]
    NoSuccess { attempts: u32, detail: String },

    #[error("fetch tool run interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

/// Errors from running a control command (`systemctl`, container runtime, ...).
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {}: {stderr}", exit_label(*.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("'{command}' interrupted: {reason}")]
    Interrupted {
        command: String,
        reason: Interrupted,
    },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "signal".to_string(),
    }
}

/// Errors from the direct-mode process manager.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("pid file exists: {} (is the server already running? stop it or remove the stale file)", path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("server is not running: no pid file at {}", path.display())]
    NotRunning { path: PathBuf },

    #[error("pid file {} does not hold a valid pid: {content:?}", path.display())]
    InvalidPidFile { path: PathBuf, content: String },

    #[error("failed to open log file {}: {source}", path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write pid file {} (spawned process was killed): {source}", path.display())]
    PidWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read pid file {}: {source}", path.display())]
    PidRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from an isolation backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("server binary not found at {}; run install first", path.display())]
    BinaryMissing { path: PathBuf },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("container {op} failed for '{name}': {message}")]
    Engine {
        op: &'static str,
        name: String,
        message: String,
    },

    #[error("path {} is outside the install directory {} and cannot be mapped into the container", path.display(), install_dir.display())]
    UnmappablePath { path: PathBuf, install_dir: PathBuf },

    #[error("server exited right after launch ({status}); see {}", log.display())]
    ExitedEarly { status: String, log: PathBuf },

    #[error("server '{key}' is still running (pid {pid}); stop it before deleting")]
    StillRunning { key: String, pid: u32 },

    #[error("{op} interrupted: {reason}")]
    Interrupted {
        op: &'static str,
        reason: Interrupted,
    },
}

impl BackendError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackendError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// True when the failure came from cancellation or a deadline rather than the tool.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            BackendError::Interrupted { .. }
                | BackendError::Fetch(FetchError::Interrupted(_))
                | BackendError::Exec(ExecError::Interrupted { .. })
        )
    }
}

/// Errors resolving per-user base directories.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("cannot resolve the home directory; set HOME or the XDG_*_HOME variables")]
    NoHomeDir,
}

/// Errors from registry lookup and operation dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown server '{key}'. Available: {}", available.join(", "))]
    UnknownServer { key: String, available: Vec<String> },

    #[error("server '{key}' is already registered")]
    DuplicateServer { key: String },

    #[error("{op} is not supported with isolation mode '{mode}'")]
    Unsupported {
        op: crate::dispatch::Operation,
        mode: IsolationMode,
    },

    #[error(
        "server '{key}' was installed with isolation '{current}'; delete it before switching to '{requested}'"
    )]
    ModeLocked {
        key: String,
        current: IsolationMode,
        requested: IsolationMode,
    },

    #[error("{op} '{key}' ({mode}): {source}")]
    Backend {
        op: crate::dispatch::Operation,
        key: String,
        mode: IsolationMode,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors loading or interpreting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown isolation mode '{0}'. Valid values: none, service, container")]
    UnknownIsolation(String),

    #[error("unknown container engine '{0}'. Valid values: cli, api")]
    UnknownEngine(String),

    #[error("--server is required. Available: {}", available.join(", "))]
    MissingServer { available: Vec<String> },

    #[error("invalid server key '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidServerKey(String),
}

/// Errors reading or writing the persisted server state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to {action} state file {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
