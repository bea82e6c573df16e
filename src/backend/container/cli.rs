//! Container engine over the `docker`/`podman` command line.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ContainerEngine, ContainerSpec, ContainerState};
use crate::backend::ServerStatus;
use crate::context::OpContext;
use crate::errors::BackendError;
use crate::exec::{CommandOutput, CommandRunner};

pub struct CliEngine {
    runtime: String,
    runner: Arc<dyn CommandRunner>,
}

impl CliEngine {
    pub fn new(runtime: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runtime: runtime.into(),
            runner,
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    async fn output(&self, ctx: &OpContext, parts: &[&str]) -> Result<CommandOutput, BackendError> {
        Ok(self.runner.output(ctx, &self.runtime, &Self::args(parts)).await?)
    }

    async fn run(&self, ctx: &OpContext, parts: &[&str]) -> Result<CommandOutput, BackendError> {
        Ok(self.runner.run(ctx, &self.runtime, &Self::args(parts)).await?)
    }

    /// `run -d` arguments for `spec`, image and command last.
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--restart".to_string(),
            spec.restart.clone(),
        ];
        if let Some(dir) = &spec.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        for bind in spec.bind_strings() {
            args.push("-v".to_string());
            args.push(bind);
        }
        for port in &spec.udp_ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}/udp", port, port));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }
}

fn is_missing(out: &CommandOutput) -> bool {
    let text = format!("{}\n{}", out.stderr, out.stdout).to_ascii_lowercase();
    text.contains("no such container") || text.contains("no such object") || text.contains("no container with name")
}

/// Find `name` in `ps -a` output formatted as `{{.Names}}\t{{.Status}}`.
fn parse_ps(stdout: &str, name: &str) -> ServerStatus {
    let row = stdout
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .find(|(names, _)| names.split(',').any(|n| n.trim() == name));
    match row {
        None => ServerStatus::Stopped,
        Some((_, status)) => {
            let status = status.trim();
            if status.starts_with("Up") {
                ServerStatus::Running {
                    pid: None,
                    detail: Some(status.to_string()),
                }
            } else if status.starts_with("Exited") || status.starts_with("Created") {
                ServerStatus::Stopped
            } else {
                ServerStatus::Detail(format!("{}: {}", name, status))
            }
        }
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn inspect(&self, ctx: &OpContext, name: &str) -> Result<Option<ContainerState>, BackendError> {
        let out = self
            .output(ctx, &["inspect", "-f", "{{.State.Running}}", name])
            .await?;
        if !out.success() {
            if is_missing(&out) {
                return Ok(None);
            }
            return Err(BackendError::Engine {
                op: "inspect",
                name: name.to_string(),
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(Some(match out.stdout.trim() {
            "true" => ContainerState::Running,
            "false" => ContainerState::Stopped,
            other => ContainerState::Other(other.to_string()),
        }))
    }

    async fn start_existing(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError> {
        self.run(ctx, &["start", name]).await.map(|_| ())
    }

    async fn create_and_run(&self, ctx: &OpContext, spec: &ContainerSpec) -> Result<(), BackendError> {
        let out = self
            .runner
            .run(ctx, &self.runtime, &Self::run_args(spec))
            .await?;
        tracing::debug!(container = %spec.name, id = %out.stdout.trim(), "container running");
        Ok(())
    }

    async fn stop(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError> {
        self.run(ctx, &["stop", name]).await.map(|_| ())
    }

    async fn remove(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError> {
        let out = self.output(ctx, &["rm", "-f", name]).await?;
        if out.success() || is_missing(&out) {
            Ok(())
        } else {
            Err(BackendError::Engine {
                op: "remove",
                name: name.to_string(),
                message: out.stderr.trim().to_string(),
            })
        }
    }

    async fn status(&self, ctx: &OpContext, name: &str) -> Result<ServerStatus, BackendError> {
        let filter = format!("name={}", name);
        let out = self
            .run(
                ctx,
                &["ps", "-a", "--filter", &filter, "--format", "{{.Names}}\t{{.Status}}"],
            )
            .await?;
        Ok(parse_ps(&out.stdout, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{RecordingRunner, fail, ok};
    use std::path::PathBuf;

    fn engine(runner: RecordingRunner) -> (Arc<RecordingRunner>, CliEngine) {
        let runner = Arc::new(runner);
        (runner.clone(), CliEngine::new("podman", runner))
    }

    #[test]
    fn run_args_place_image_after_options() {
        let spec = ContainerSpec {
            name: "garrison-x".to_string(),
            image: "debian:bookworm-slim".to_string(),
            binds: vec![(PathBuf::from("/srv/x"), "/data".to_string())],
            udp_ports: vec![2001, 2002],
            restart: "unless-stopped".to_string(),
            working_dir: None,
            command: vec!["/data/bin".to_string(), "-a".to_string()],
        };
        assert_eq!(
            CliEngine::run_args(&spec).join(" "),
            "run -d --name garrison-x --restart unless-stopped -v /srv/x:/data \
             -p 2001:2001/udp -p 2002:2002/udp debian:bookworm-slim /data/bin -a"
        );
    }

    #[test]
    fn ps_parsing_matches_exact_name() {
        let out = "garrison-x-old\tUp 2 hours\ngarrison-x\tExited (0) 5 minutes ago\n";
        assert_eq!(parse_ps(out, "garrison-x"), ServerStatus::Stopped);
        assert_eq!(
            parse_ps(out, "garrison-x-old").to_string(),
            "running (Up 2 hours)"
        );
        assert_eq!(parse_ps("", "garrison-x"), ServerStatus::Stopped);
        assert_eq!(
            parse_ps("garrison-x\tRestarting (1) 3 seconds ago\n", "garrison-x").to_string(),
            "garrison-x: Restarting (1) 3 seconds ago"
        );
    }

    #[tokio::test]
    async fn inspect_maps_missing_container_to_none() {
        let (_, engine) = engine(RecordingRunner::with_responder(|_| {
            Some(fail(125, "Error: no such container garrison-x"))
        }));
        assert_eq!(engine.inspect(&OpContext::new(), "garrison-x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn inspect_reports_other_failures() {
        let (_, engine) = engine(RecordingRunner::with_responder(|_| {
            Some(fail(1, "Cannot connect to the Docker daemon"))
        }));
        let err = engine
            .inspect(&OpContext::new(), "garrison-x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cannot connect"));
    }

    #[tokio::test]
    async fn status_uses_filtered_ps() {
        let (runner, engine) = engine(RecordingRunner::with_responder(|_| {
            Some(ok("garrison-x\tUp 3 minutes\n"))
        }));
        let status = engine.status(&OpContext::new(), "garrison-x").await.unwrap();
        assert!(status.is_running());
        assert_eq!(
            runner.calls(),
            vec!["podman ps -a --filter name=garrison-x --format {{.Names}}\t{{.Status}}"]
        );
    }

    #[tokio::test]
    async fn remove_surfaces_real_failures() {
        let (_, engine) = engine(RecordingRunner::with_responder(|_| {
            Some(fail(1, "permission denied"))
        }));
        let err = engine.remove(&OpContext::new(), "garrison-x").await.unwrap_err();
        assert!(matches!(err, BackendError::Engine { op: "remove", .. }));
    }
}
