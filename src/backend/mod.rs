//! Isolation backends.
//!
//! Every backend carries out the same five operations for one server; the
//! [`Dispatcher`](crate::dispatch::Dispatcher) picks the backend from the
//! server's [`IsolationMode`].
//!
//! | Module      | Mode        | Mechanism                                     |
//! |-------------|-------------|-----------------------------------------------|
//! | `direct`    | `none`      | Host process tracked by a PID file (`process`) |
//! | `service`   | `service`   | `systemd --user` unit rendered by `unit`       |
//! | `container` | `container` | docker/podman CLI or the Docker Engine API     |

pub mod container;
pub mod direct;
pub mod process;
pub mod service;
pub mod unit;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::context::OpContext;
use crate::errors::BackendError;
use crate::games::{GameDefinition, StartOptions};
use crate::types::IsolationMode;

pub use container::ContainerBackend;
pub use direct::DirectBackend;
pub use process::{ProcessHandle, ProcessManager};
pub use service::ServiceBackend;

/// What a status query found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Running {
        pid: Option<u32>,
        detail: Option<String>,
    },
    Stopped,
    /// Raw report from the manager when the state is neither running nor stopped.
    Detail(String),
}

impl ServerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServerStatus::Running { .. })
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Running { pid: Some(pid), .. } => write!(f, "running (pid={})", pid),
            ServerStatus::Running {
                pid: None,
                detail: Some(detail),
            } => write!(f, "running ({})", detail),
            ServerStatus::Running { .. } => write!(f, "running"),
            ServerStatus::Stopped => write!(f, "stopped"),
            ServerStatus::Detail(text) => write!(f, "{}", text.trim_end()),
        }
    }
}

/// One isolation strategy.
///
/// `install_dir` is where the server files live for this call; backends with
/// their own fixed layout may ignore it.
#[async_trait]
pub trait Backend: Send + Sync {
    fn mode(&self) -> IsolationMode;

    /// Fetch the server files. `validate=false` is an update.
    async fn install_or_update(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
        validate: bool,
    ) -> Result<(), BackendError>;

    async fn start(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
        opts: &StartOptions,
    ) -> Result<(), BackendError>;

    async fn stop(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
    ) -> Result<(), BackendError>;

    async fn status(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
    ) -> Result<ServerStatus, BackendError>;

    /// Remove everything the backend created for the server.
    async fn delete(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
    ) -> Result<(), BackendError>;
}

/// `remove_dir_all` that treats a missing directory as done.
pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<(), BackendError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackendError::io("failed to remove", path, e)),
    }
}

/// `remove_file` that treats a missing file as done.
pub(crate) fn remove_file_if_exists(path: &Path) -> Result<(), BackendError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackendError::io("failed to remove", path, e)),
    }
}

pub(crate) fn create_dirs(paths: &[&Path]) -> Result<(), BackendError> {
    for path in paths {
        std::fs::create_dir_all(path)
            .map_err(|e| BackendError::io("failed to create", *path, e))?;
    }
    Ok(())
}
