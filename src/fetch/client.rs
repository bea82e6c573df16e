//! Retrying SteamCMD client.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::outcome::OutcomeTally;
use super::runner::{FetchRunner, LocalRunner};
use super::script::{self, Credentials};
use crate::context::OpContext;
use crate::errors::FetchError;

/// Callback that receives every output line, prefix applied.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct FetchConfig {
    /// Executable name or path; resolved through `PATH` when bare.
    pub binary: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Total attempts. Zero is treated as one.
    pub retries: u32,
    /// Base delay; attempt `n` is followed by `n * backoff`.
    pub backoff: Duration,
    /// Prefer streaming when the runner supports it.
    pub stream: bool,
    pub attempt_timeout: Option<Duration>,
    pub on_output: Option<OutputSink>,
    pub output_prefix: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            binary: "steamcmd".to_string(),
            username: None,
            password: None,
            retries: 3,
            backoff: Duration::from_millis(1000),
            stream: true,
            attempt_timeout: None,
            on_output: None,
            output_prefix: String::new(),
        }
    }
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("binary", &self.binary)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("retries", &self.retries)
            .field("backoff", &self.backoff)
            .field("stream", &self.stream)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("on_output", &self.on_output.is_some())
            .field("output_prefix", &self.output_prefix)
            .finish()
    }
}

impl FetchConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn with_output(mut self, prefix: impl Into<String>, sink: OutputSink) -> Self {
        self.output_prefix = prefix.into();
        self.on_output = Some(sink);
        self
    }
}

/// One install or update request. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJobSpec {
    pub app_id: u32,
    pub install_dir: PathBuf,
    pub validate: bool,
    /// Overrides the client's configured login.
    pub credentials: Option<Credentials>,
}

impl FetchJobSpec {
    pub fn new(app_id: u32, install_dir: impl Into<PathBuf>, validate: bool) -> Self {
        Self {
            app_id,
            install_dir: install_dir.into(),
            validate,
            credentials: None,
        }
    }
}

#[derive(Clone)]
pub struct FetchClient {
    config: FetchConfig,
    runner: Arc<dyn FetchRunner>,
}

impl fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Client that runs the tool on the local host.
    pub fn new(config: FetchConfig) -> Self {
        Self::with_runner(config, Arc::new(LocalRunner))
    }

    pub fn with_runner(config: FetchConfig, runner: Arc<dyn FetchRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Install `job.app_id` into `job.install_dir`, validating files when asked.
    pub async fn install_or_update(&self, ctx: &OpContext, job: &FetchJobSpec) -> Result<(), FetchError> {
        let creds = job
            .credentials
            .clone()
            .unwrap_or_else(|| self.config.credentials());
        let dir = job.install_dir.to_string_lossy();
        let args = script::install_args(&creds, &dir, job.app_id, job.validate);
        self.exec(ctx, &args).await
    }

    /// Same as an install without validation.
    pub async fn update(&self, ctx: &OpContext, app_id: u32, install_dir: impl Into<PathBuf>) -> Result<(), FetchError> {
        self.install_or_update(ctx, &FetchJobSpec::new(app_id, install_dir, false))
            .await
    }

    /// Log in and quit without downloading anything.
    pub async fn ping_login(&self, ctx: &OpContext) -> Result<(), FetchError> {
        let args = script::ping_args(&self.config.credentials());
        self.exec(ctx, &args).await
    }

    /// Execute a runscript at `path` (as seen by the tool).
    pub async fn run_script(&self, ctx: &OpContext, path: &str) -> Result<(), FetchError> {
        self.exec(ctx, &script::runscript_args(path)).await
    }

    /// Run the tool with `args`, retrying until an attempt is classified as a success.
    ///
    /// A missing binary and interruptions end the loop immediately.
    pub async fn exec(&self, ctx: &OpContext, args: &[String]) -> Result<(), FetchError> {
        let attempts = self.config.retries.max(1);
        let shown = script::redact_args(args).join(" ");
        let mut detail = String::new();

        for attempt in 1..=attempts {
            tracing::debug!(
                attempt,
                attempts,
                bin = %self.config.binary,
                args = %shown,
                "running fetch tool"
            );
            let attempt_ctx = ctx.child_with_timeout(self.config.attempt_timeout);
            match self.attempt(&attempt_ctx, args).await {
                Ok(None) => {
                    tracing::debug!(attempt, "fetch tool reported success");
                    return Ok(());
                }
                Ok(Some(reason)) => detail = reason,
                Err(e @ FetchError::BinaryNotFound { .. }) => return Err(e),
                Err(FetchError::Interrupted(reason)) => {
                    // Only the caller's cancel or deadline is terminal; an
                    // expired attempt timeout is retried like any failure.
                    ctx.check()?;
                    detail = format!("attempt timed out ({})", reason);
                }
                Err(e) => detail = e.to_string(),
            }

            if attempt < attempts {
                let delay = self.config.backoff * attempt;
                tracing::warn!(
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason = %detail,
                    "fetch attempt failed, retrying"
                );
                ctx.sleep(delay).await?;
            }
        }

        Err(FetchError::NoSuccess { attempts, detail })
    }

    /// One run of the tool. `Ok(None)` is a success, `Ok(Some(reason))` a classified failure.
    async fn attempt(&self, ctx: &OpContext, args: &[String]) -> Result<Option<String>, FetchError> {
        let tally = OutcomeTally::default();
        let bin = self.config.binary.as_str();

        let exit_code = if self.config.stream
            && let Some(streaming) = self.runner.streaming()
        {
            let handle = |raw: &[u8]| {
                let line = String::from_utf8_lossy(raw);
                self.emit(&line);
                tally.record(&line);
            };
            streaming
                .run_streaming(ctx, bin, args, &handle, &handle)
                .await?
        } else {
            let out = self.runner.run(ctx, bin, args).await?;
            for line in out.output.lines() {
                self.emit(line);
                tally.record(line);
            }
            out.exit_code
        };

        Ok(tally.failure_reason(exit_code))
    }

    fn emit(&self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        match &self.config.on_output {
            Some(sink) => sink(&format!("{}{}", self.config.output_prefix, line)),
            None => tracing::trace!(target: "garrison::fetch", "{}", line),
        }
    }
}
