//! `none` isolation: the server runs as a plain host process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::process::{self, ProcessManager};
use super::{Backend, ServerStatus, create_dirs, remove_dir_if_exists, remove_file_if_exists};
use crate::context::OpContext;
use crate::errors::{BackendError, ProcessError};
use crate::fetch::{self, FetchClient, FetchConfig, FetchJobSpec, FetchRunner, LocalRunner};
use crate::games::{GameDefinition, LaunchPaths, StartOptions};
use crate::paths::{DirsSource, ServerPaths, absolute};
use crate::types::IsolationMode;

const STARTUP_GRACE: Duration = Duration::from_secs(1);
const STOP_GRACE: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

pub struct DirectBackend {
    dirs: DirsSource,
    fetch: FetchConfig,
    fetch_runner: Arc<dyn FetchRunner>,
    startup_grace: Duration,
    stop_grace: Duration,
}

impl DirectBackend {
    pub fn new(dirs: DirsSource, fetch: FetchConfig) -> Self {
        Self {
            dirs,
            fetch,
            fetch_runner: Arc::new(LocalRunner),
            startup_grace: STARTUP_GRACE,
            stop_grace: STOP_GRACE,
        }
    }

    pub fn with_fetch_runner(mut self, runner: Arc<dyn FetchRunner>) -> Self {
        self.fetch_runner = runner;
        self
    }

    /// How long start waits before checking that the process survived launch,
    /// and how long stop waits for SIGTERM to take effect.
    pub fn with_grace(mut self, startup: Duration, stop: Duration) -> Self {
        self.startup_grace = startup;
        self.stop_grace = stop;
        self
    }

    fn layout(&self, game: &dyn GameDefinition) -> Result<ServerPaths, BackendError> {
        Ok(self.dirs.resolve()?.server(game.key()))
    }

    fn manager(layout: &ServerPaths) -> ProcessManager {
        ProcessManager::new(&layout.pid_file, &layout.server_log)
    }
}

#[async_trait]
impl Backend for DirectBackend {
    fn mode(&self) -> IsolationMode {
        IsolationMode::None
    }

    async fn install_or_update(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
        validate: bool,
    ) -> Result<(), BackendError> {
        let layout = self.layout(game)?;
        let install_dir = absolute(install_dir);
        create_dirs(&[&install_dir, &layout.logs])?;

        let config = fetch::with_log_tee(self.fetch.clone(), &layout.logs.join("steamcmd.log"));
        let client = FetchClient::with_runner(config, self.fetch_runner.clone());
        let job = FetchJobSpec::new(game.app_id(), &install_dir, validate);
        client.install_or_update(ctx, &job).await?;

        tracing::info!(server = %game.key(), dir = %install_dir.display(), "server files ready");
        Ok(())
    }

    async fn start(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
        opts: &StartOptions,
    ) -> Result<(), BackendError> {
        let layout = self.layout(game)?;
        let manager = Self::manager(&layout);
        // PID file guard first, before the binary check.
        if manager.pid_file().exists() {
            return Err(ProcessError::AlreadyRunning {
                path: manager.pid_file().to_path_buf(),
            }
            .into());
        }

        let install_dir = absolute(install_dir);
        let paths = LaunchPaths::direct(game, &install_dir, opts);
        if !paths.executable.is_file() {
            return Err(BackendError::BinaryMissing {
                path: paths.executable,
            });
        }
        create_dirs(&[&paths.profile, &layout.logs])?;

        let args = game.launch_args(&paths, opts);
        let mut spawned = manager.start(&paths.executable, &args, &install_dir)?;
        let pid = spawned.handle.pid;

        if let Err(reason) = ctx.sleep(self.startup_grace).await {
            tracing::warn!(pid, %reason, "start interrupted during startup grace; server left running");
            return Err(BackendError::Interrupted { op: "start", reason });
        }
        if let Some(status) = spawned.exited() {
            remove_file_if_exists(manager.pid_file())?;
            return Err(BackendError::ExitedEarly {
                status: status.to_string(),
                log: layout.server_log,
            });
        }

        tracing::info!(server = %game.key(), pid, "server started");
        Ok(())
    }

    async fn stop(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
    ) -> Result<(), BackendError> {
        let layout = self.layout(game)?;
        let pid = Self::manager(&layout).stop()?;

        let deadline = Instant::now() + self.stop_grace;
        while process::is_alive(pid) {
            if Instant::now() >= deadline {
                tracing::warn!(pid, grace = ?self.stop_grace, "server ignored SIGTERM, killing");
                process::force_kill(pid);
                break;
            }
            if let Err(reason) = ctx.sleep(STOP_POLL).await {
                tracing::warn!(pid, %reason, "stop interrupted while waiting for exit; pid file already removed");
                return Err(BackendError::Interrupted { op: "stop", reason });
            }
        }

        tracing::info!(server = %game.key(), pid, "server stopped");
        Ok(())
    }

    async fn status(
        &self,
        _ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
    ) -> Result<ServerStatus, BackendError> {
        let layout = self.layout(game)?;
        Ok(Self::manager(&layout).status()?)
    }

    async fn delete(
        &self,
        _ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
    ) -> Result<(), BackendError> {
        let layout = self.layout(game)?;
        let manager = Self::manager(&layout);
        if let Some(pid) = manager.read_pid()? {
            if process::is_alive(pid) {
                return Err(BackendError::StillRunning {
                    key: game.key().to_string(),
                    pid,
                });
            }
            tracing::debug!(pid, "removing stale pid file");
        }
        remove_file_if_exists(manager.pid_file())?;
        remove_dir_if_exists(&absolute(install_dir))?;
        tracing::info!(server = %game.key(), "server files deleted");
        Ok(())
    }
}
