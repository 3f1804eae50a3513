//! [`ContainerRuntime`] backed by a Docker daemon.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::BuildImageOptions;
use bollard::models::{DeviceRequest as EngineDeviceRequest, HostConfig};
use bollard::{Docker, API_DEFAULT_VERSION};
use brainns_core::naming::{ContainerName, ContainerPrefix};
use brainns_core::types::DbId;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};

use crate::archive::StagingArchive;
use crate::error::RuntimeError;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ExitOutcome, LogStream};

/// Label put on every container this runtime creates.
pub const MANAGED_BY_LABEL: &str = "managed_by";
const MANAGED_BY_VALUE: &str = "brainns";

/// Seconds before a request to the daemon times out.
const SOCKET_TIMEOUT_SECS: u64 = 120;

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect through `socket`, or the platform defaults when `None`.
    pub fn connect(socket: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(path, SOCKET_TIMEOUT_SECS, API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn build_image(&self, tag: &str, build_context: &Path) -> Result<(), RuntimeError> {
        let context = build_context.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || StagingArchive::from_dir(&context))
            .await
            .map_err(|e| RuntimeError::Build {
                tag: tag.to_string(),
                message: format!("context archiving panicked: {e}"),
            })??;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };
        let mut stream = self.docker.build_image(options, None, Some(archive));
        while let Some(info) = stream.try_next().await? {
            if let Some(message) = info.error {
                return Err(RuntimeError::Build {
                    tag: tag.to_string(),
                    message,
                });
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(image = %tag, "{line}");
                }
            }
        }
        Ok(())
    }
}

/// HTTP status of a daemon error response, if it is one.
fn response_status(error: &BollardError) -> Option<u16> {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// 404 (gone), 304 (already stopped) and 409 (removal in progress) all mean
/// the container is stopping or stopped already.
fn is_already_gone(error: &BollardError) -> bool {
    matches!(response_status(error), Some(404 | 304 | 409))
}

fn to_engine_request(request: &crate::runtime::DeviceRequest) -> EngineDeviceRequest {
    EngineDeviceRequest {
        driver: Some(request.driver.clone()),
        device_ids: Some(request.device_ids.clone()),
        capabilities: Some(vec![request.capabilities.clone()]),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, tag: &str, build_context: &Path) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => return Ok(()),
            Err(e) if response_status(&e) == Some(404) => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(image = %tag, context = %build_context.display(), "Building image");
        self.build_image(tag, build_context).await?;
        tracing::info!(image = %tag, "Image built");
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let name = spec.name.to_string();
        let labels = HashMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (
                "segmentation_id".to_string(),
                spec.name.segmentation_id.to_string(),
            ),
        ]);

        let host_config = HostConfig {
            binds: Some(spec.volumes.iter().map(|v| v.bind_string()).collect()),
            auto_remove: Some(spec.auto_remove),
            device_requests: (!spec.device_requests.is_empty())
                .then(|| spec.device_requests.iter().map(to_engine_request).collect()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            user: spec.user.clone(),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;
        tracing::debug!(container = %name, image = %spec.image, "Container created");
        Ok(ContainerHandle::new(name))
    }

    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        archive: Bytes,
        dest_path: &str,
    ) -> Result<(), RuntimeError> {
        self.docker
            .upload_to_container(
                &handle.name,
                Some(UploadToContainerOptions {
                    path: dest_path.to_string(),
                    ..Default::default()
                }),
                archive,
            )
            .await?;
        Ok(())
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.docker
            .start_container(&handle.name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    fn stream_logs(&self, handle: &ContainerHandle) -> LogStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        self.docker
            .logs(&handle.name, Some(options))
            .map(|chunk| chunk.map(|output| output.into_bytes()).map_err(RuntimeError::from))
            .boxed()
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitOutcome, RuntimeError> {
        let mut stream = self
            .docker
            .wait_container(&handle.name, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(ExitOutcome {
                status_code: response.status_code,
            }),
            // bollard reports non-zero exits as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => {
                Ok(ExitOutcome { status_code: code })
            }
            Some(Err(e)) if response_status(&e) == Some(404) => {
                Err(RuntimeError::NoSuchContainer(handle.name.clone()))
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::NoSuchContainer(handle.name.clone())),
        }
    }

    async fn find_by_name_suffix(
        &self,
        prefixes: &[ContainerPrefix],
        segmentation_id: DbId,
    ) -> Result<Vec<ContainerHandle>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;

        let mut handles: Vec<ContainerHandle> = containers
            .into_iter()
            .flat_map(|summary| summary.names.unwrap_or_default())
            .filter(|name| ContainerName::matches(name, prefixes, segmentation_id))
            .map(|name| ContainerHandle::new(name.trim_start_matches('/')))
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles.dedup();
        Ok(handles)
    }

    async fn stop(&self, handle: &ContainerHandle, graceful: bool) -> Result<(), RuntimeError> {
        let options = (!graceful).then_some(StopContainerOptions { t: 0 });
        match self.docker.stop_container(&handle.name, options).await {
            Ok(()) => {}
            Err(e) if is_already_gone(&e) => {
                tracing::debug!(container = %handle.name, error = %e, "Container already stopped");
            }
            Err(e) => return Err(e.into()),
        }
        // A container that never started is not removed by auto-remove.
        self.remove(handle).await
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_already_gone(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
