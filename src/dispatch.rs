//! Operation dispatch: resolve a server and its isolation mode, then hand the
//! call to exactly one backend.
//!
//! The persisted mode wins. Asking for a different mode than the one a server
//! was installed with is refused until the server is deleted.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{Backend, ContainerBackend, DirectBackend, ServerStatus, ServiceBackend};
use crate::config::GarrisonToml;
use crate::context::OpContext;
use crate::errors::{BackendError, DispatchError};
use crate::games::{GameDefinition, StartOptions};
use crate::paths::DirsSource;
use crate::registry::Registry;
use crate::state::StateStore;
use crate::types::IsolationMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Install,
    Update,
    Start,
    Stop,
    Status,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Update => "update",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Status => "status",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerRequest {
    pub key: String,
    /// Explicit `--isolation`; `None` uses the persisted mode.
    pub isolation: Option<IsolationMode>,
    /// Explicit `--install-dir`; `None` uses the per-server data directory.
    pub install_dir: Option<PathBuf>,
}

impl ServerRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn isolation(mut self, mode: Option<IsolationMode>) -> Self {
        self.isolation = mode;
        self
    }

    pub fn install_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.install_dir = dir;
        self
    }
}

/// A request after lookup and mode resolution.
pub struct Resolved {
    pub game: Arc<dyn GameDefinition>,
    pub mode: IsolationMode,
    pub install_dir: PathBuf,
    pub backend: Arc<dyn Backend>,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("key", self.game.key())
            .field("mode", &self.mode)
            .field("install_dir", &self.install_dir)
            .finish_non_exhaustive()
    }
}

pub struct Dispatcher<'a> {
    registry: &'a Registry,
    backends: HashMap<IsolationMode, Arc<dyn Backend>>,
    state: StateStore,
    dirs: DirsSource,
}

impl<'a> Dispatcher<'a> {
    /// Dispatcher with no backends; add them with [`Dispatcher::with_backend`].
    pub fn new(registry: &'a Registry, state: StateStore, dirs: DirsSource) -> Self {
        Self {
            registry,
            backends: HashMap::new(),
            state,
            dirs,
        }
    }

    /// Dispatcher with the direct, service and container backends configured from `config`.
    pub fn standard(registry: &'a Registry, state: StateStore, dirs: DirsSource, config: &GarrisonToml) -> Self {
        let fetch = config.fetch.client_config();
        Self::new(registry, state, dirs.clone())
            .with_backend(Arc::new(DirectBackend::new(dirs.clone(), fetch.clone())))
            .with_backend(Arc::new(ServiceBackend::new(
                dirs.clone(),
                fetch.clone(),
                config.service.clone(),
            )))
            .with_backend(Arc::new(ContainerBackend::new(
                dirs,
                fetch,
                config.container.clone(),
            )))
    }

    /// Register `backend` for the mode it reports, replacing any previous one.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.mode(), backend);
        self
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Look up the server, settle the isolation mode and pick the backend.
    pub fn resolve(&self, op: Operation, req: &ServerRequest) -> Result<Resolved, DispatchError> {
        let game = self.registry.get(&req.key)?;
        let persisted = self.state.get(game.key())?.map(|s| s.isolation);
        let mode = match (persisted, req.isolation) {
            (Some(current), Some(requested)) if current != requested => {
                return Err(DispatchError::ModeLocked {
                    key: req.key.clone(),
                    current,
                    requested,
                });
            }
            (Some(current), _) => current,
            (None, Some(requested)) => requested,
            (None, None) => IsolationMode::default(),
        };

        let backend = self
            .backends
            .get(&mode)
            .cloned()
            .ok_or(DispatchError::Unsupported { op, mode })?;

        let install_dir = match &req.install_dir {
            Some(dir) => dir.clone(),
            None => {
                let dirs = self.dirs.resolve().map_err(|e| DispatchError::Backend {
                    op,
                    key: req.key.clone(),
                    mode,
                    source: BackendError::Path(e),
                })?;
                dirs.server(game.key()).base
            }
        };

        tracing::debug!(op = %op, server = %game.key(), mode = %mode, dir = %install_dir.display(), "dispatching");
        Ok(Resolved {
            game,
            mode,
            install_dir,
            backend,
        })
    }

    fn wrap(op: Operation, resolved: &Resolved) -> impl FnOnce(BackendError) -> DispatchError {
        let key = resolved.game.key().to_string();
        let mode = resolved.mode;
        move |source| DispatchError::Backend {
            op,
            key,
            mode,
            source,
        }
    }

    async fn fetch(&self, ctx: &OpContext, op: Operation, req: &ServerRequest, validate: bool) -> Result<Resolved, DispatchError> {
        let r = self.resolve(op, req)?;
        r.backend
            .install_or_update(ctx, r.game.as_ref(), &r.install_dir, validate)
            .await
            .map_err(Self::wrap(op, &r))?;
        self.state.set_isolation(r.game.key(), r.mode)?;
        Ok(r)
    }

    /// Fetch with validation and record the isolation mode.
    pub async fn install(&self, ctx: &OpContext, req: &ServerRequest) -> Result<Resolved, DispatchError> {
        self.fetch(ctx, Operation::Install, req, true).await
    }

    /// Fetch without validation.
    pub async fn update(&self, ctx: &OpContext, req: &ServerRequest) -> Result<Resolved, DispatchError> {
        self.fetch(ctx, Operation::Update, req, false).await
    }

    pub async fn start(&self, ctx: &OpContext, req: &ServerRequest, opts: &StartOptions) -> Result<Resolved, DispatchError> {
        let r = self.resolve(Operation::Start, req)?;
        r.backend
            .start(ctx, r.game.as_ref(), &r.install_dir, opts)
            .await
            .map_err(Self::wrap(Operation::Start, &r))?;
        Ok(r)
    }

    pub async fn stop(&self, ctx: &OpContext, req: &ServerRequest) -> Result<Resolved, DispatchError> {
        let r = self.resolve(Operation::Stop, req)?;
        r.backend
            .stop(ctx, r.game.as_ref(), &r.install_dir)
            .await
            .map_err(Self::wrap(Operation::Stop, &r))?;
        Ok(r)
    }

    pub async fn status(&self, ctx: &OpContext, req: &ServerRequest) -> Result<(Resolved, ServerStatus), DispatchError> {
        let r = self.resolve(Operation::Status, req)?;
        let status = r
            .backend
            .status(ctx, r.game.as_ref(), &r.install_dir)
            .await
            .map_err(Self::wrap(Operation::Status, &r))?;
        Ok((r, status))
    }

    /// Remove the server and forget its isolation mode.
    pub async fn delete(&self, ctx: &OpContext, req: &ServerRequest) -> Result<Resolved, DispatchError> {
        let r = self.resolve(Operation::Delete, req)?;
        r.backend
            .delete(ctx, r.game.as_ref(), &r.install_dir)
            .await
            .map_err(Self::wrap(Operation::Delete, &r))?;
        self.state.remove(r.game.key())?;
        Ok(r)
    }
}
