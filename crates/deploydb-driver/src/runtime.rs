//! The container-runtime seam used by the containerized driver.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Label set on every container and volume this daemon creates.
pub const LABEL_MANAGED: &str = "deploydb";

/// Label carrying the owning deployment id.
pub const LABEL_DEPLOYMENT: &str = "deploydb.deployment_id";

/// Errors reported by a container runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The referenced container, volume, or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime rejected or failed the call. Carries its message verbatim.
    #[error("{0}")]
    Api(String),

    /// The runtime could not be reached at all.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// A named volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub target: String,
}

/// Everything needed to start one database container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    /// Port the engine listens on inside the container. Published to an
    /// OS-assigned port on the host loopback interface.
    pub internal_port: u16,
    /// `None` leaves the image's own anonymous volume in place.
    pub volume: Option<VolumeMount>,
    pub labels: HashMap<String, String>,
}

/// Labels identifying resources that belong to a deployment.
pub fn labels_for(deployment_id: &str) -> HashMap<String, String> {
    HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_DEPLOYMENT.to_string(), deployment_id.to_string()),
    ])
}

/// Name of the dedicated data volume for a deployment.
pub fn volume_name(deployment_id: &str) -> String {
    format!("deploydb_vol_{deployment_id}")
}

/// Container name derived from the deployment id and a start timestamp.
pub fn container_name(deployment_id: &str, epoch_secs: u64) -> String {
    let short: String = deployment_id.chars().take(12).collect();
    format!("deploydb_{short}_{epoch_secs}")
}

/// Client for a container runtime.
///
/// Implementations are shared by every provisioning and teardown task, so
/// they must be usable concurrently without external locking.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image, returning once it is available locally.
    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;

    /// Create a named volume.
    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>)
    -> RuntimeResult<()>;

    /// Remove a named volume.
    async fn remove_volume(&self, name: &str) -> RuntimeResult<()>;

    /// Create and start a container, returning its handle.
    async fn run_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Host port currently mapped to `internal_port`, if any.
    async fn inspect_host_port(&self, container: &str, internal_port: u16)
    -> RuntimeResult<Option<u16>>;

    /// Stop a container, waiting at most `grace` before it is killed.
    async fn stop_container(&self, container: &str, grace: Duration) -> RuntimeResult<()>;

    /// Remove a container together with its anonymous volumes.
    async fn remove_container(&self, container: &str) -> RuntimeResult<()>;

    /// Look up the container labelled with `deployment_id`.
    async fn find_container(&self, deployment_id: &str) -> RuntimeResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names_derive_from_id() {
        let id = "0123456789abcdef0123456789abcdef";
        assert_eq!(volume_name(id), format!("deploydb_vol_{id}"));
        assert_eq!(container_name(id, 1700000000), "deploydb_0123456789ab_1700000000");
    }

    #[test]
    fn labels_mark_ownership() {
        let labels = labels_for("abc");
        assert_eq!(labels.get(LABEL_MANAGED).map(String::as_str), Some("true"));
        assert_eq!(labels.get(LABEL_DEPLOYMENT).map(String::as_str), Some("abc"));
    }

    #[test]
    fn api_errors_render_verbatim() {
        let err = RuntimeError::Api("manifest for mysql:nope not found".to_string());
        assert_eq!(err.to_string(), "manifest for mysql:nope not found");
    }
}
