//! In-process container runtime for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::runtime::{
    ContainerRuntime, ContainerSpec, LABEL_DEPLOYMENT, RuntimeError, RuntimeResult,
};

/// First host port handed out by the mock.
const FIRST_HOST_PORT: u16 = 49153;

/// One call made against a [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    PullImage(String),
    CreateVolume(String),
    RemoveVolume(String),
    RunContainer(String),
    InspectHostPort(String),
    StopContainer(String),
    RemoveContainer(String),
    FindContainer(String),
}

/// Failure and latency script, fixed once the mock is built.
#[derive(Debug, Clone)]
struct Script {
    pull_error: Option<String>,
    pull_delay: Duration,
    volume_error: Option<String>,
    run_error: Option<String>,
    inspect_errors: u32,
    /// Inspections before the port mapping shows up; `None` means never.
    map_after: Option<u32>,
    stop_error: Option<String>,
    remove_error: Option<String>,
    remove_volume_error: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            pull_error: None,
            pull_delay: Duration::ZERO,
            volume_error: None,
            run_error: None,
            inspect_errors: 0,
            map_after: Some(1),
            stop_error: None,
            remove_error: None,
            remove_volume_error: None,
        }
    }
}

#[derive(Debug)]
struct MockContainer {
    spec: ContainerSpec,
    host_port: u16,
    inspections: u32,
    running: bool,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<RuntimeCall>,
    containers: HashMap<String, MockContainer>,
    volumes: HashSet<String>,
    next_container: u64,
    next_port: u16,
}

/// A scriptable [`ContainerRuntime`] that keeps containers and volumes in
/// memory and records every call.
///
/// By default every call succeeds and a container's port mapping is visible
/// on the first inspection.
#[derive(Debug, Default)]
pub struct MockRuntime {
    script: Script,
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every image pull fail with `message`.
    pub fn with_pull_failure(mut self, message: impl Into<String>) -> Self {
        self.script.pull_error = Some(message.into());
        self
    }

    /// Delay every image pull.
    pub fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.script.pull_delay = delay;
        self
    }

    pub fn with_volume_failure(mut self, message: impl Into<String>) -> Self {
        self.script.volume_error = Some(message.into());
        self
    }

    pub fn with_run_failure(mut self, message: impl Into<String>) -> Self {
        self.script.run_error = Some(message.into());
        self
    }

    /// Fail the first `count` inspections of each container.
    pub fn with_inspect_errors(mut self, count: u32) -> Self {
        self.script.inspect_errors = count;
        self
    }

    /// Report the port mapping only from the `n`th inspection onward.
    pub fn with_port_mapping_after(mut self, n: u32) -> Self {
        self.script.map_after = Some(n);
        self
    }

    /// Never report a port mapping.
    pub fn without_port_mapping(mut self) -> Self {
        self.script.map_after = None;
        self
    }

    pub fn with_stop_failure(mut self, message: impl Into<String>) -> Self {
        self.script.stop_error = Some(message.into());
        self
    }

    pub fn with_remove_failure(mut self, message: impl Into<String>) -> Self {
        self.script.remove_error = Some(message.into());
        self
    }

    pub fn with_volume_remove_failure(mut self, message: impl Into<String>) -> Self {
        self.script.remove_volume_error = Some(message.into());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    /// Containers that exist (running or stopped).
    pub fn containers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.state().containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Containers currently running.
    pub fn running_containers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .state()
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Spec a container was started with.
    pub fn container_spec(&self, container: &str) -> Option<ContainerSpec> {
        self.state()
            .containers
            .get(container)
            .map(|c| c.spec.clone())
    }

    /// Named volumes that exist.
    pub fn volumes(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state().volumes.iter().cloned().collect();
        names.sort();
        names
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: RuntimeCall) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

fn scripted(error: &Option<String>) -> RuntimeResult<()> {
    match error {
        Some(message) => Err(RuntimeError::Api(message.clone())),
        None => Ok(()),
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        drop(self.record(RuntimeCall::PullImage(image.to_string())));
        if !self.script.pull_delay.is_zero() {
            tokio::time::sleep(self.script.pull_delay).await;
        }
        scripted(&self.script.pull_error)
    }

    async fn create_volume(
        &self,
        name: &str,
        _labels: &HashMap<String, String>,
    ) -> RuntimeResult<()> {
        let mut state = self.record(RuntimeCall::CreateVolume(name.to_string()));
        scripted(&self.script.volume_error)?;
        state.volumes.insert(name.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.record(RuntimeCall::RemoveVolume(name.to_string()));
        scripted(&self.script.remove_volume_error)?;
        if !state.volumes.remove(name) {
            return Err(RuntimeError::NotFound(format!("volume {name}")));
        }
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut state = self.record(RuntimeCall::RunContainer(spec.name.clone()));
        scripted(&self.script.run_error)?;
        if let Some(volume) = &spec.volume {
            if !state.volumes.contains(&volume.name) {
                return Err(RuntimeError::NotFound(format!("volume {}", volume.name)));
            }
        }

        state.next_container += 1;
        let id = format!("{:064x}", state.next_container);
        let host_port = FIRST_HOST_PORT + state.next_port;
        state.next_port += 1;
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                host_port,
                inspections: 0,
                running: true,
            },
        );
        Ok(id)
    }

    async fn inspect_host_port(
        &self,
        container: &str,
        _internal_port: u16,
    ) -> RuntimeResult<Option<u16>> {
        let mut state = self.record(RuntimeCall::InspectHostPort(container.to_string()));
        let Some(c) = state.containers.get_mut(container) else {
            return Err(RuntimeError::NotFound(format!("container {container}")));
        };
        c.inspections += 1;
        if c.inspections <= self.script.inspect_errors {
            return Err(RuntimeError::Api("inspect temporarily unavailable".to_string()));
        }
        let seen = c.inspections - self.script.inspect_errors;
        match self.script.map_after {
            Some(n) if seen >= n => Ok(Some(c.host_port)),
            _ => Ok(None),
        }
    }

    async fn stop_container(&self, container: &str, _grace: Duration) -> RuntimeResult<()> {
        let mut state = self.record(RuntimeCall::StopContainer(container.to_string()));
        scripted(&self.script.stop_error)?;
        match state.containers.get_mut(container) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!("container {container}"))),
        }
    }

    async fn remove_container(&self, container: &str) -> RuntimeResult<()> {
        let mut state = self.record(RuntimeCall::RemoveContainer(container.to_string()));
        scripted(&self.script.remove_error)?;
        match state.containers.remove(container) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(format!("container {container}"))),
        }
    }

    async fn find_container(&self, deployment_id: &str) -> RuntimeResult<Option<String>> {
        let state = self.record(RuntimeCall::FindContainer(deployment_id.to_string()));
        Ok(state
            .containers
            .iter()
            .find(|(_, c)| {
                c.spec.labels.get(LABEL_DEPLOYMENT).map(String::as_str) == Some(deployment_id)
            })
            .map(|(id, _)| id.clone()))
    }
}
