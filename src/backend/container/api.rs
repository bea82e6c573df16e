//! Container engine over the Docker Engine API.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    errors::Error as BollardError,
    models::{ContainerCreateBody, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum},
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder, RemoveContainerOptionsBuilder,
        StopContainerOptionsBuilder,
    },
};
use futures_util::TryStreamExt;

use super::{ContainerEngine, ContainerSpec, ContainerState};
use crate::backend::ServerStatus;
use crate::context::OpContext;
use crate::errors::BackendError;

const STOP_TIMEOUT_SECS: i32 = 10;

/// Connects with the local defaults (`DOCKER_HOST` or the default socket) on each call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiEngine;

impl ApiEngine {
    pub fn new() -> Self {
        Self
    }

    fn client(&self, name: &str) -> Result<Docker, BackendError> {
        Docker::connect_with_local_defaults().map_err(|source| engine_error("connect", name, source))
    }
}

fn engine_error(op: &'static str, name: &str, source: BollardError) -> BackendError {
    BackendError::Engine {
        op,
        name: name.to_string(),
        message: source.to_string(),
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code: 404, .. }
    )
}

/// Run `fut` under the operation context.
async fn guarded<T>(
    ctx: &OpContext,
    op: &'static str,
    fut: impl Future<Output = T>,
) -> Result<T, BackendError> {
    ctx.run(fut)
        .await
        .map_err(|reason| BackendError::Interrupted { op, reason })
}

/// `image[:tag]` split for pulls; a bare name means `latest`.
fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (image, "latest"),
    }
}

fn port_bindings(ports: &[u16]) -> HashMap<String, Option<Vec<PortBinding>>> {
    ports
        .iter()
        .map(|port| {
            (
                format!("{}/udp", port),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(port.to_string()),
                }]),
            )
        })
        .collect()
}

fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        working_dir: spec.working_dir.clone(),
        host_config: Some(HostConfig {
            binds: Some(spec.bind_strings()),
            port_bindings: Some(port_bindings(&spec.udp_ports)),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}

#[async_trait]
impl ContainerEngine for ApiEngine {
    async fn inspect(&self, ctx: &OpContext, name: &str) -> Result<Option<ContainerState>, BackendError> {
        let docker = self.client(name)?;
        let result = guarded(
            ctx,
            "inspect",
            docker.inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>),
        )
        .await?;
        match result {
            Ok(info) => {
                let state = info.state.unwrap_or_default();
                Ok(Some(match state.running {
                    Some(true) => ContainerState::Running,
                    Some(false) => ContainerState::Stopped,
                    None => ContainerState::Other(
                        state
                            .status
                            .map(|s| format!("{:?}", s).to_lowercase())
                            .unwrap_or_else(|| "unknown".to_string()),
                    ),
                }))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(engine_error("inspect", name, e)),
        }
    }

    async fn start_existing(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError> {
        let docker = self.client(name)?;
        guarded(
            ctx,
            "start",
            docker.start_container(name, None::<bollard::query_parameters::StartContainerOptions>),
        )
        .await?
        .map_err(|e| engine_error("start", name, e))
    }

    async fn create_and_run(&self, ctx: &OpContext, spec: &ContainerSpec) -> Result<(), BackendError> {
        let name = spec.name.as_str();
        let docker = self.client(name)?;

        if guarded(ctx, "inspect image", docker.inspect_image(&spec.image))
            .await?
            .is_err()
        {
            let (from_image, tag) = split_image(&spec.image);
            tracing::info!(image = %spec.image, "pulling image");
            guarded(
                ctx,
                "pull",
                docker
                    .create_image(
                        Some(
                            CreateImageOptionsBuilder::new()
                                .from_image(from_image)
                                .tag(tag)
                                .build(),
                        ),
                        None,
                        None,
                    )
                    .try_collect::<Vec<_>>(),
            )
            .await?
            .map_err(|e| engine_error("pull", name, e))?;
        }

        guarded(
            ctx,
            "create",
            docker.create_container(
                Some(CreateContainerOptionsBuilder::new().name(name).build()),
                create_body(spec),
            ),
        )
        .await?
        .map_err(|e| engine_error("create", name, e))?;

        self.start_existing(ctx, name).await
    }

    async fn stop(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError> {
        let docker = self.client(name)?;
        guarded(
            ctx,
            "stop",
            docker.stop_container(
                name,
                Some(StopContainerOptionsBuilder::new().t(STOP_TIMEOUT_SECS).build()),
            ),
        )
        .await?
        .map_err(|e| engine_error("stop", name, e))
    }

    async fn remove(&self, ctx: &OpContext, name: &str) -> Result<(), BackendError> {
        let docker = self.client(name)?;
        let result = guarded(
            ctx,
            "remove",
            docker.remove_container(
                name,
                Some(RemoveContainerOptionsBuilder::new().force(true).build()),
            ),
        )
        .await?;
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(engine_error("remove", name, e)),
        }
    }

    async fn status(&self, ctx: &OpContext, name: &str) -> Result<ServerStatus, BackendError> {
        let docker = self.client(name)?;
        let result = guarded(
            ctx,
            "status",
            docker.inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>),
        )
        .await?;
        let info = match result {
            Ok(info) => info,
            Err(e) if is_not_found(&e) => return Ok(ServerStatus::Stopped),
            Err(e) => return Err(engine_error("status", name, e)),
        };
        let state = info.state.unwrap_or_default();
        if state.running == Some(true) {
            let pid = state
                .pid
                .and_then(|pid| u32::try_from(pid).ok())
                .filter(|pid| *pid > 0);
            Ok(ServerStatus::Running {
                pid,
                detail: state.started_at.map(|at| format!("up since {}", at)),
            })
        } else {
            Ok(ServerStatus::Stopped)
        }
    }
}
