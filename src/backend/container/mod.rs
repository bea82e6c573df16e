//! `container` isolation: the server runs in a long-lived OCI container.
//!
//! Server-container lifecycle goes through a [`ContainerEngine`]: the runtime
//! CLI ([`CliEngine`]) or the Docker Engine API ([`ApiEngine`]). Fetching always
//! uses the runtime CLI in a throwaway `run --rm` container.

pub mod api;
pub mod cli;

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{Backend, ServerStatus, create_dirs, remove_dir_if_exists, remove_file_if_exists};
use crate::config::{ContainerSection, EngineKind};
use crate::context::OpContext;
use crate::errors::BackendError;
use crate::exec::{CommandRunner, HostRunner};
use crate::fetch::script::{self, runscript_args};
use crate::fetch::{self, FetchClient, FetchConfig, FetchRunner, LocalRunner, WrappedRunner};
use crate::games::{CONTAINER_DATA_DIR, GameDefinition, LaunchPaths, StartOptions};
use crate::paths::{DirsSource, absolute};
use crate::types::IsolationMode;

pub use api::ApiEngine;
pub use cli::CliEngine;

/// Runscript written into the install dir for the duration of a fetch.
pub const SCRIPT_NAME: &str = ".garrison_steamcmd_run.txt";
const CACHE_MOUNT: &str = "/cache";
const FETCH_BIN: &str = "steamcmd";
pub const RESTART_POLICY: &str = "unless-stopped";

/// Everything needed to create the server container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `(host path, container path)`
    pub binds: Vec<(PathBuf, String)>,
    /// Published 1:1 as `<port>:<port>/udp`.
    pub udp_ports: Vec<u16>,
    pub restart: String,
    pub working_dir: Option<String>,
    pub command: Vec<String>,
}

impl ContainerSpec {
    pub fn bind_strings(&self) -> Vec<String> {
        self.binds
            .iter()
            .map(|(host, inside)| format!("{}:{}", host.display(), inside))
            .collect()
    }
}

/// State reported by an inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Other(String),
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// `None` when no container has that name.
    async fn inspect(&self, ctx: &OpContext, name: &str) -> Result<Option<ContainerState>, BackendError>;

    async fn start_existing(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError>;

    /// Create and start a detached container from `spec`.
    async fn create_and_run(&self, ctx: &OpContext, spec: &ContainerSpec) -> Result<(), BackendError>;

    async fn stop(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError>;

    /// Force-remove; a missing container is not an error.
    async fn remove(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError>;

    async fn status(&self, ctx: &OpContext, name: &str) -> Result<ServerStatus, BackendError>;
}

pub struct ContainerBackend {
    dirs: DirsSource,
    fetch: FetchConfig,
    settings: ContainerSection,
    engine: Arc<dyn ContainerEngine>,
    fetch_runner: Arc<dyn FetchRunner>,
}

impl ContainerBackend {
    /// Backend using the engine selected in `settings`.
    pub fn new(dirs: DirsSource, fetch: FetchConfig, settings: ContainerSection) -> Self {
        let engine: Arc<dyn ContainerEngine> = match settings.engine {
            EngineKind::Cli => Arc::new(CliEngine::new(settings.runtime.clone(), Arc::new(HostRunner))),
            EngineKind::Api => Arc::new(ApiEngine::new()),
        };
        Self {
            dirs,
            fetch,
            settings,
            engine,
            fetch_runner: Arc::new(LocalRunner),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_fetch_runner(mut self, runner: Arc<dyn FetchRunner>) -> Self {
        self.fetch_runner = runner;
        self
    }

    /// CLI engine over an arbitrary command runner.
    pub fn with_cli_runner(self, runner: Arc<dyn CommandRunner>) -> Self {
        let engine = CliEngine::new(self.settings.runtime.clone(), runner);
        self.with_engine(Arc::new(engine))
    }

    fn cache_dir(&self) -> Result<PathBuf, BackendError> {
        match &self.settings.cache_dir {
            Some(dir) => Ok(absolute(dir)),
            None => Ok(self.dirs.resolve()?.fetch_cache()),
        }
    }

    /// `<runtime> run --rm …` prefix for the throwaway fetch container.
    fn fetch_prefix(&self, install_dir: &Path, cache_dir: &Path) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-e".to_string(),
            format!("HOME={}", CACHE_MOUNT),
            "-w".to_string(),
            CONTAINER_DATA_DIR.to_string(),
            "-v".to_string(),
            format!("{}:{}", install_dir.display(), CONTAINER_DATA_DIR),
            "-v".to_string(),
            format!("{}:{}", cache_dir.display(), CACHE_MOUNT),
            self.settings.fetch_image.clone(),
        ]
    }

    fn spec(&self, game: &dyn GameDefinition, install_dir: &Path, opts: &StartOptions) -> Result<ContainerSpec, BackendError> {
        let host = LaunchPaths::direct(game, install_dir, opts);
        if !host.executable.is_file() {
            return Err(BackendError::BinaryMissing { path: host.executable });
        }
        let inside = host.in_container(install_dir)?;
        let mut command = vec![inside.executable.to_string_lossy().into_owned()];
        command.extend(game.launch_args(&inside, opts));
        Ok(ContainerSpec {
            name: game.key().container_name(),
            image: self.settings.server_image.clone(),
            binds: vec![(install_dir.to_path_buf(), CONTAINER_DATA_DIR.to_string())],
            udp_ports: game.udp_ports(opts),
            restart: RESTART_POLICY.to_string(),
            working_dir: Some(CONTAINER_DATA_DIR.to_string()),
            command,
        })
    }
}

fn write_script(path: &Path, content: &str) -> Result<(), BackendError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| BackendError::io("failed to write", path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| BackendError::io("failed to write", path, e))
}

#[async_trait]
impl Backend for ContainerBackend {
    fn mode(&self) -> IsolationMode {
        IsolationMode::Container
    }

    async fn install_or_update(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
        validate: bool,
    ) -> Result<(), BackendError> {
        let install_dir = absolute(install_dir);
        let cache_dir = self.cache_dir()?;
        let logs = self.dirs.resolve()?.server(game.key()).logs;
        create_dirs(&[&install_dir, &cache_dir, &logs])?;

        let script_path = install_dir.join(SCRIPT_NAME);
        let content = script::build_runscript(
            &self.fetch.credentials(),
            CONTAINER_DATA_DIR,
            game.app_id(),
            validate,
        );
        write_script(&script_path, &content)?;

        let runner = WrappedRunner::new(
            self.settings.runtime.clone(),
            self.fetch_prefix(&install_dir, &cache_dir),
            self.fetch_runner.clone(),
        );
        let mut config = fetch::with_log_tee(self.fetch.clone(), &logs.join("steamcmd.log"));
        config.binary = FETCH_BIN.to_string();
        let client = FetchClient::with_runner(config, Arc::new(runner));
        let inside = format!("{}/{}", CONTAINER_DATA_DIR, SCRIPT_NAME);
        let result = client.exec(ctx, &runscript_args(&inside)).await;

        // The script may hold credentials; it goes regardless of the outcome.
        if let Err(e) = remove_file_if_exists(&script_path) {
            tracing::warn!(error = %e, "failed to remove runscript");
        }
        result?;

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
        let install_dir = absolute(install_dir);
        let spec = self.spec(game, &install_dir, opts)?;
        let name = spec.name.as_str();

        match self.engine.inspect(ctx, name).await {
            Ok(Some(ContainerState::Running)) => {
                tracing::info!(container = name, "already running");
                return Ok(());
            }
            Ok(Some(ContainerState::Stopped)) => match self.engine.start_existing(ctx, name).await {
                Ok(()) => {
                    tracing::info!(container = name, "existing container started");
                    return Ok(());
                }
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => tracing::warn!(container = name, error = %e, "restart failed, recreating"),
            },
            Ok(Some(ContainerState::Other(state))) => {
                tracing::warn!(container = name, state = %state, "unexpected state, recreating");
            }
            Ok(None) => {}
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => tracing::warn!(container = name, error = %e, "inspect failed, recreating"),
        }

        // A real name conflict surfaces from create_and_run.
        match self.engine.remove(ctx, name).await {
            Ok(()) => {}
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => tracing::warn!(container = name, error = %e, "could not remove old container"),
        }
        self.engine.create_and_run(ctx, &spec).await?;
        tracing::info!(container = name, image = %spec.image, "container created");
        Ok(())
    }

    async fn stop(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
    ) -> Result<(), BackendError> {
        let name = game.key().container_name();
        self.engine.stop(ctx, &name).await?;
        tracing::info!(container = %name, "container stopped");
        Ok(())
    }

    async fn status(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
    ) -> Result<ServerStatus, BackendError> {
        self.engine.status(ctx, &game.key().container_name()).await
    }

    async fn delete(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        install_dir: &Path,
    ) -> Result<(), BackendError> {
        let name = game.key().container_name();
        self.engine.remove(ctx, &name).await?;
        remove_dir_if_exists(&absolute(install_dir))?;
        tracing::info!(container = %name, "container and files deleted");
        Ok(())
    }
}
