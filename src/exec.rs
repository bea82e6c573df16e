//! Control-command execution.
//!
//! Backends drive `systemctl` and the container runtime through the
//! [`CommandRunner`] trait so tests can record calls instead of touching the host.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::context::OpContext;
use crate::errors::ExecError;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Render a command line for logs and error messages.
pub fn display_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is not an error here.
    async fn output(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, ExecError>;

    /// Run to completion and fail unless the command exits 0.
    async fn run(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, ExecError> {
        let out = self.output(ctx, program, args).await?;
        if out.success() {
            Ok(out)
        } else {
            let detail = if out.stderr.trim().is_empty() {
                out.stdout.trim().to_string()
            } else {
                out.stderr.trim().to_string()
            };
            Err(ExecError::Failed {
                command: display_command(program, args),
                code: out.code,
                stderr: detail,
            })
        }
    }
}

/// Runs commands on the local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

#[async_trait]
impl CommandRunner for HostRunner {
    async fn output(
        &self,
        ctx: &OpContext,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, ExecError> {
        let command = display_command(program, args);
        ctx.check().map_err(|reason| ExecError::Interrupted {
            command: command.clone(),
            reason,
        })?;
        tracing::debug!(command = %command, "running");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let output = ctx
            .run(child.wait_with_output())
            .await
            .map_err(|reason| ExecError::Interrupted {
                command: command.clone(),
                reason,
            })?
            .map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let out = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(command = %command, code = ?out.code, "finished");
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fake used by backend tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    type Responder = Box<dyn Fn(&str) -> Option<CommandOutput> + Send + Sync>;

    /// Records every call as a single `"program arg arg"` line and answers from
    /// a responder, then from a queue, then with exit 0.
    #[derive(Default)]
    pub struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        queued: Mutex<VecDeque<CommandOutput>>,
        responder: Option<Responder>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer calls whose rendered command line satisfies the closure.
        pub fn with_responder(
            responder: impl Fn(&str) -> Option<CommandOutput> + Send + Sync + 'static,
        ) -> Self {
            Self {
                responder: Some(Box::new(responder)),
                ..Self::default()
            }
        }

        pub fn push(&self, out: CommandOutput) {
            self.queued.lock().unwrap().push_back(out);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn called(&self, line: &str) -> bool {
            self.calls().iter().any(|c| c == line)
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn output(
            &self,
            _ctx: &OpContext,
            program: &str,
            args: &[String],
        ) -> Result<CommandOutput, ExecError> {
            let line = display_command(program, args);
            self.calls.lock().unwrap().push(line.clone());
            if let Some(responder) = &self.responder
                && let Some(out) = responder(&line)
            {
                return Ok(out);
            }
            Ok(self
                .queued
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ok("")))
        }
    }
}
