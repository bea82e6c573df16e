//! `service` isolation: a `systemd --user` unit per server.
//!
//! Files live in the per-server XDG layout ([`ServerPaths`]); the caller's
//! install directory is not used. Fetching runs in a transient unit with the
//! same sandbox as the server unit.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::unit::{self, ServiceUnit, shell_quote};
use super::{Backend, ServerStatus, create_dirs, remove_dir_if_exists, remove_file_if_exists};
use crate::config::ServiceSection;
use crate::context::OpContext;
use crate::errors::{BackendError, ExecError};
use crate::exec::{CommandOutput, CommandRunner, HostRunner};
use crate::fetch::script::{self, Credentials};
use crate::fetch::{self, FetchClient, FetchConfig, FetchJobSpec, FetchRunner, LocalRunner, WrappedRunner};
use crate::games::{GameDefinition, LaunchPaths, StartOptions};
use crate::paths::{DirsSource, ServerPaths};
use crate::types::IsolationMode;

const SYSTEMCTL: &str = "systemctl";
const SYSTEMD_RUN: &str = "systemd-run";

pub struct ServiceBackend {
    dirs: DirsSource,
    fetch: FetchConfig,
    settings: ServiceSection,
    runner: Arc<dyn CommandRunner>,
    fetch_runner: Arc<dyn FetchRunner>,
}

impl ServiceBackend {
    pub fn new(dirs: DirsSource, fetch: FetchConfig, settings: ServiceSection) -> Self {
        Self {
            dirs,
            fetch,
            settings,
            runner: Arc::new(HostRunner),
            fetch_runner: Arc::new(LocalRunner),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_fetch_runner(mut self, runner: Arc<dyn FetchRunner>) -> Self {
        self.fetch_runner = runner;
        self
    }

    fn layout(&self, game: &dyn GameDefinition) -> Result<ServerPaths, BackendError> {
        Ok(self.dirs.resolve()?.server(game.key()))
    }

    async fn systemctl(&self, ctx: &OpContext, args: &[&str]) -> Result<CommandOutput, ExecError> {
        self.runner.run(ctx, SYSTEMCTL, &user_args(args)).await
    }

    async fn systemctl_output(&self, ctx: &OpContext, args: &[&str]) -> Result<CommandOutput, ExecError> {
        self.runner.output(ctx, SYSTEMCTL, &user_args(args)).await
    }

    /// `systemctl --user <verb> <unit>` where failure is logged, not returned.
    /// Interruptions still propagate.
    async fn systemctl_best_effort(&self, ctx: &OpContext, verb: &str, unit: &str) -> Result<(), BackendError> {
        match self.systemctl(ctx, &[verb, unit]).await {
            Ok(_) => Ok(()),
            Err(e @ ExecError::Interrupted { .. }) => Err(e.into()),
            Err(e) => {
                tracing::debug!(unit, verb, error = %e, "ignored during delete");
                Ok(())
            }
        }
    }

    /// `systemd-run` prefix for a transient fetch unit.
    fn transient_prefix(&self, game: &dyn GameDefinition, layout: &ServerPaths) -> Vec<String> {
        let mut prefix = vec![
            "--user".to_string(),
            format!("--unit={}", game.key().transient_unit_name()),
            "--wait".to_string(),
            "--collect".to_string(),
            "--pipe".to_string(),
            format!("--setenv=HOME={}", layout.cache.display()),
        ];
        prefix.extend(unit::sandbox_properties(&[
            &layout.base,
            &layout.cache,
            &layout.logs,
        ]));
        prefix
    }

    /// Commands run by `ExecStartPre`, in order.
    fn pre_commands(&self, game: &dyn GameDefinition, layout: &ServerPaths) -> Vec<String> {
        let mkdir = ["mkdir", "-p"]
            .into_iter()
            .map(str::to_string)
            .chain(
                [&layout.app, &layout.profiles, &layout.logs]
                    .iter()
                    .map(|p| shell_quote(&p.to_string_lossy())),
            )
            .collect::<Vec<_>>()
            .join(" ");
        let mut commands = vec![mkdir];

        if self.settings.update_on_start {
            // The password never goes into the unit file; a cached login is reused.
            let creds = match &self.fetch.username {
                Some(name) => Credentials::user(name.clone(), None),
                None => Credentials::anonymous(),
            };
            let args = script::install_args(&creds, &layout.app.to_string_lossy(), game.app_id(), false);
            let update = std::iter::once(shell_quote(&self.fetch.binary))
                .chain(args.iter().map(|a| shell_quote(a)))
                .collect::<Vec<_>>()
                .join(" ");
            commands.push(update);
        }
        commands
    }

    fn render_unit(&self, game: &dyn GameDefinition, layout: &ServerPaths, opts: &StartOptions) -> ServiceUnit {
        let paths = LaunchPaths::for_service(game, layout, opts);
        let mut exec_start = vec![paths.executable.to_string_lossy().into_owned()];
        exec_start.extend(game.launch_args(&paths, opts));
        ServiceUnit {
            description: format!("garrison: {} ({})", game.display_name(), game.key()),
            working_dir: layout.app.clone(),
            exec_start_pre: self.pre_commands(game, layout),
            exec_start,
            log_file: layout.server_log.clone(),
            read_write_paths: vec![layout.base.clone(), layout.cache.clone(), layout.logs.clone()],
        }
    }

    async fn status_fallback(&self, ctx: &OpContext, unit: &str, state: &str) -> Result<ServerStatus, BackendError> {
        let out = self.systemctl_output(ctx, &["status", "--no-pager", unit]).await?;
        let text = if out.stdout.trim().is_empty() { out.stderr } else { out.stdout };
        if text.trim().is_empty() {
            Ok(ServerStatus::Detail(format!("{} ({})", unit, state)))
        } else {
            Ok(ServerStatus::Detail(text))
        }
    }
}

fn user_args(args: &[&str]) -> Vec<String> {
    std::iter::once("--user")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Backend for ServiceBackend {
    fn mode(&self) -> IsolationMode {
        IsolationMode::Service
    }

    async fn install_or_update(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
        validate: bool,
    ) -> Result<(), BackendError> {
        let layout = self.layout(game)?;
        create_dirs(&[&layout.app, &layout.profiles, &layout.cache, &layout.logs])?;

        let runner = WrappedRunner::new(
            SYSTEMD_RUN,
            self.transient_prefix(game, &layout),
            self.fetch_runner.clone(),
        );
        let config = fetch::with_log_tee(self.fetch.clone(), &layout.logs.join("steamcmd.log"));
        let client = FetchClient::with_runner(config, Arc::new(runner));
        let job = FetchJobSpec::new(game.app_id(), &layout.app, validate);
        client.install_or_update(ctx, &job).await?;

        tracing::info!(server = %game.key(), dir = %layout.app.display(), "server files ready");
        Ok(())
    }

    async fn start(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
        opts: &StartOptions,
    ) -> Result<(), BackendError> {
        let layout = self.layout(game)?;
        create_dirs(&[&layout.logs])?;
        let unit = self.render_unit(game, &layout, opts);
        unit.write(&layout.unit)?;
        tracing::debug!(path = %layout.unit.display(), "unit written");

        let name = game.key().unit_name();
        self.systemctl(ctx, &["daemon-reload"]).await?;
        self.systemctl(ctx, &["enable", &name]).await?;
        self.systemctl(ctx, &["start", &name]).await?;
        tracing::info!(server = %game.key(), unit = %name, "unit started");
        Ok(())
    }

    async fn stop(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
    ) -> Result<(), BackendError> {
        let name = game.key().unit_name();
        self.systemctl(ctx, &["stop", &name]).await?;
        tracing::info!(server = %game.key(), unit = %name, "unit stopped");
        Ok(())
    }

    async fn status(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
    ) -> Result<ServerStatus, BackendError> {
        let name = game.key().unit_name();
        let state = match self.systemctl_output(ctx, &["is-active", &name]).await {
            Ok(out) => out.stdout.trim().to_string(),
            Err(e @ ExecError::Interrupted { .. }) => return Err(e.into()),
            Err(e) => {
                tracing::debug!(unit = %name, error = %e, "is-active failed");
                String::new()
            }
        };

        match state.as_str() {
            "active" => {
                let pid = self
                    .systemctl_output(ctx, &["show", "--property=MainPID", "--value", &name])
                    .await
                    .ok()
                    .and_then(|out| out.stdout.trim().parse::<u32>().ok())
                    .filter(|pid| *pid > 0);
                Ok(ServerStatus::Running { pid, detail: None })
            }
            "inactive" => Ok(ServerStatus::Stopped),
            other => self.status_fallback(ctx, &name, other).await,
        }
    }

    async fn delete(
        &self,
        ctx: &OpContext,
        game: &dyn GameDefinition,
        _install_dir: &Path,
    ) -> Result<(), BackendError> {
        let layout = self.layout(game)?;
        let name = game.key().unit_name();
        self.systemctl_best_effort(ctx, "stop", &name).await?;
        self.systemctl_best_effort(ctx, "disable", &name).await?;

        remove_file_if_exists(&layout.unit)?;
        remove_dir_if_exists(&layout.base)?;
        remove_dir_if_exists(&layout.cache)?;
        remove_dir_if_exists(&layout.logs)?;

        self.systemctl(ctx, &["daemon-reload"]).await?;
        tracing::info!(server = %game.key(), "unit and files deleted");
        Ok(())
    }
}
