//! Docker implementation of [`ContainerRuntime`], via bollard.

use std::collections::HashMap;
use std::pin::pin;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::runtime::{
    ContainerRuntime, ContainerSpec, LABEL_DEPLOYMENT, RuntimeError, RuntimeResult,
};

/// Host interface published container ports are bound to.
const PUBLISH_HOST_IP: &str = "127.0.0.1";

/// Container runtime backed by the local Docker daemon.
///
/// `Docker` is a cheap, clonable handle; one instance serves every task.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket, and
    /// verify the daemon answers.
    pub async fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        info!("connected to docker daemon");
        Ok(Self { docker })
    }
}

fn map_err(e: BollardError) -> RuntimeError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        other => RuntimeError::Api(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut progress = pin!(self.docker.create_image(Some(options), None, None));
        while let Some(update) = progress.next().await {
            let update = update.map_err(map_err)?;
            if let Some(status) = update.status {
                debug!(%image, %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> RuntimeResult<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker.create_volume(options).await.map_err(map_err)?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> RuntimeResult<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(map_err)
    }

    async fn run_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let port_key = format!("{}/tcp", spec.internal_port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::new());

        // No host port: the daemon picks a free one.
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key,
            Some(vec![PortBinding {
                host_ip: Some(PUBLISH_HOST_IP.to_string()),
                host_port: None,
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: spec
                .volume
                .as_ref()
                .map(|v| vec![format!("{}:{}:rw", v.name, v.target)]),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_err)?;
        for warning in &created.warnings {
            warn!(container = %created.id, %warning, "docker warning on create");
        }

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Do not leave a created-but-never-started container behind.
            let _ = self.remove_container(&created.id).await;
            return Err(map_err(e));
        }

        Ok(created.id)
    }

    async fn inspect_host_port(
        &self,
        container: &str,
        internal_port: u16,
    ) -> RuntimeResult<Option<u16>> {
        let info = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(map_err)?;

        let key = format!("{internal_port}/tcp");
        let port = info
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&key).flatten())
            .and_then(|bindings| {
                bindings
                    .into_iter()
                    .filter_map(|b| b.host_port)
                    .find_map(|p| p.parse::<u16>().ok().filter(|p| *p != 0))
            });
        Ok(port)
    }

    async fn stop_container(&self, container: &str, grace: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn remove_container(&self, container: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            v: true,
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container, Some(options))
            .await
            .map_err(map_err)
    }

    async fn find_container(&self, deployment_id: &str) -> RuntimeResult<Option<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{LABEL_DEPLOYMENT}={deployment_id}")],
        );
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_err)?;
        Ok(containers.into_iter().find_map(|c| c.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_resources_map_to_not_found() {
        let err = map_err(BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        });
        assert_eq!(err, RuntimeError::NotFound("No such container: abc".to_string()));
    }

    #[test]
    fn other_failures_keep_daemon_message() {
        let err = map_err(BollardError::DockerResponseServerError {
            status_code: 500,
            message: "driver failed programming external connectivity".to_string(),
        });
        match err {
            RuntimeError::Api(message) => {
                assert!(message.contains("driver failed programming external connectivity"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
