//! How the fetch tool gets executed.
//!
//! [`FetchRunner`] is the buffered contract: run to completion, return combined
//! output and the exit code. Runners that can also deliver output while the
//! tool runs expose [`StreamingRunner`] through [`FetchRunner::streaming`].
//! [`WrappedRunner`] reuses any runner behind a launcher such as `systemd-run`
//! or `docker run --rm`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::lines::LineBuffer;
use crate::context::OpContext;
use crate::errors::FetchError;

/// Receives one complete line (without terminator) per call.
pub type LineSink<'a> = &'a (dyn Fn(&[u8]) + Send + Sync);

/// Result of a buffered run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// stdout followed by stderr.
    pub output: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait FetchRunner: Send + Sync {
    async fn run(&self, ctx: &OpContext, bin: &str, args: &[String]) -> Result<RunOutput, FetchError>;

    /// Streaming view of this runner, if it supports one.
    fn streaming(&self) -> Option<&dyn StreamingRunner> {
        None
    }
}

#[async_trait]
pub trait StreamingRunner: Send + Sync {
    /// Run to completion, delivering stdout and stderr lines as they arrive.
    /// Both streams are fully drained before this returns the exit code.
    async fn run_streaming(
        &self,
        ctx: &OpContext,
        bin: &str,
        args: &[String],
        on_stdout: LineSink<'_>,
        on_stderr: LineSink<'_>,
    ) -> Result<Option<i32>, FetchError>;
}

fn spawn_error(bin: &str, source: std::io::Error) -> FetchError {
    if source.kind() == std::io::ErrorKind::NotFound {
        FetchError::BinaryNotFound {
            bin: bin.to_string(),
        }
    } else {
        FetchError::Spawn {
            bin: bin.to_string(),
            source,
        }
    }
}

fn command(bin: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(bin);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, sink: LineSink<'_>) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut lines = LineBuffer::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => lines.push(&chunk[..n], sink),
            Err(e) => {
                tracing::debug!(error = %e, "output stream read failed");
                break;
            }
        }
    }
    lines.finish(sink);
}

/// Runs the fetch tool as a child of this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

#[async_trait]
impl FetchRunner for LocalRunner {
    async fn run(&self, ctx: &OpContext, bin: &str, args: &[String]) -> Result<RunOutput, FetchError> {
        ctx.check()?;
        let child = command(bin, args)
            .spawn()
            .map_err(|e| spawn_error(bin, e))?;

        let output = ctx
            .run(child.wait_with_output())
            .await?
            .map_err(|source| FetchError::Wait {
                bin: bin.to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        Ok(RunOutput {
            output: combined,
            exit_code: output.status.code(),
        })
    }

    fn streaming(&self) -> Option<&dyn StreamingRunner> {
        Some(self)
    }
}

#[async_trait]
impl StreamingRunner for LocalRunner {
    async fn run_streaming(
        &self,
        ctx: &OpContext,
        bin: &str,
        args: &[String],
        on_stdout: LineSink<'_>,
        on_stderr: LineSink<'_>,
    ) -> Result<Option<i32>, FetchError> {
        ctx.check()?;
        let mut child = command(bin, args)
            .spawn()
            .map_err(|e| spawn_error(bin, e))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Dropping this future on interruption drops `child`, which kills it.
        let status = ctx
            .run(async {
                let (_, _, status) = tokio::join!(
                    drain(stdout, on_stdout),
                    drain(stderr, on_stderr),
                    child.wait()
                );
                status
            })
            .await?
            .map_err(|source| FetchError::Wait {
                bin: bin.to_string(),
                source,
            })?;

        Ok(status.code())
    }
}

/// Runs the fetch tool through a launcher: `<program> <prefix…> <bin> <args…>`.
#[derive(Clone)]
pub struct WrappedRunner {
    program: String,
    prefix: Vec<String>,
    inner: Arc<dyn FetchRunner>,
}

impl WrappedRunner {
    pub fn new(program: impl Into<String>, prefix: Vec<String>, inner: Arc<dyn FetchRunner>) -> Self {
        Self {
            program: program.into(),
            prefix,
            inner,
        }
    }

    fn wrap(&self, bin: &str, args: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(self.prefix.len() + args.len() + 1);
        full.extend(self.prefix.iter().cloned());
        full.push(bin.to_string());
        full.extend(args.iter().cloned());
        full
    }
}

impl std::fmt::Debug for WrappedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedRunner")
            .field("program", &self.program)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FetchRunner for WrappedRunner {
    async fn run(&self, ctx: &OpContext, bin: &str, args: &[String]) -> Result<RunOutput, FetchError> {
        self.inner.run(ctx, &self.program, &self.wrap(bin, args)).await
    }

    fn streaming(&self) -> Option<&dyn StreamingRunner> {
        self.inner.streaming().map(|_| self as &dyn StreamingRunner)
    }
}

#[async_trait]
impl StreamingRunner for WrappedRunner {
    async fn run_streaming(
        &self,
        ctx: &OpContext,
        bin: &str,
        args: &[String],
        on_stdout: LineSink<'_>,
        on_stderr: LineSink<'_>,
    ) -> Result<Option<i32>, FetchError> {
        let full = self.wrap(bin, args);
        match self.inner.streaming() {
            Some(streaming) => {
                streaming
                    .run_streaming(ctx, &self.program, &full, on_stdout, on_stderr)
                    .await
            }
            None => {
                let out = self.inner.run(ctx, &self.program, &full).await?;
                for line in out.output.lines() {
                    on_stdout(line.as_bytes());
                }
                Ok(out.exit_code)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;
    use std::sync::Mutex;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn local_runner_combines_output_and_reports_exit_code() {
        let out = LocalRunner
            .run(
                &OpContext::new(),
                "sh",
                &args(&["-c", "echo out; echo err >&2; exit 4"]),
            )
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(4));
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn local_runner_maps_missing_binary() {
        let err = LocalRunner
            .run(&OpContext::new(), "garrison-no-such-steamcmd", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::BinaryNotFound { .. }));
    }

    #[tokio::test]
    async fn streaming_drains_both_streams_and_flushes_partial_lines() {
        let out_lines = Mutex::new(Vec::new());
        let err_lines = Mutex::new(Vec::new());
        let on_out = |l: &[u8]| {
            out_lines
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(l).into_owned())
        };
        let on_err = |l: &[u8]| {
            err_lines
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(l).into_owned())
        };

        let code = LocalRunner
            .run_streaming(
                &OpContext::new(),
                "sh",
                &args(&["-c", "printf 'one\\ntwo'; printf 'oops\\n' >&2; exit 0"]),
                &on_out,
                &on_err,
            )
            .await
            .unwrap();

        assert_eq!(code, Some(0));
        assert_eq!(*out_lines.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(*err_lines.lock().unwrap(), vec!["oops"]);
    }

    #[tokio::test]
    async fn streaming_honours_deadline() {
        let ctx = OpContext::new().with_timeout(std::time::Duration::from_millis(100));
        let sink = |_: &[u8]| {};
        let err = LocalRunner
            .run_streaming(&ctx, "sleep", &args(&["5"]), &sink, &sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Interrupted(crate::errors::Interrupted::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn wrapped_runner_prefixes_launcher() {
        let inner = Arc::new(ScriptedRunner::buffered());
        let wrapped = WrappedRunner::new(
            "docker",
            args(&["run", "--rm", "steamcmd/steamcmd:latest"]),
            inner.clone(),
        );
        wrapped
            .run(&OpContext::new(), "steamcmd", &args(&["+quit"]))
            .await
            .unwrap();
        assert_eq!(
            inner.calls(),
            vec!["docker run --rm steamcmd/steamcmd:latest steamcmd +quit"]
        );
        assert!(wrapped.streaming().is_none());
    }

    #[tokio::test]
    async fn wrapped_runner_streams_when_inner_can() {
        let inner = Arc::new(ScriptedRunner::streaming());
        inner.push("Success!\n", Some(0));
        let wrapped = WrappedRunner::new("systemd-run", args(&["--user"]), inner.clone());

        let seen = Mutex::new(Vec::new());
        let sink = |l: &[u8]| seen.lock().unwrap().push(String::from_utf8_lossy(l).into_owned());
        let streaming = wrapped.streaming().expect("streaming");
        let code = streaming
            .run_streaming(&OpContext::new(), "steamcmd", &[], &sink, &sink)
            .await
            .unwrap();

        assert_eq!(code, Some(0));
        assert_eq!(*seen.lock().unwrap(), vec!["Success!"]);
        assert_eq!(inner.calls(), vec!["systemd-run --user steamcmd"]);
    }
}
