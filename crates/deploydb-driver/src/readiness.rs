//! Readiness poller — waits for a container's host-side port mapping.
//!
//! Inspects the container at a fixed interval until the runtime reports a
//! host port for the engine's internal port, or the wall-clock budget runs
//! out. Inspection errors count as "not ready yet"; only exhausting the
//! budget is reported.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::runtime::ContainerRuntime;

/// Outcome of a single inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The runtime reported this host port.
    Mapped(u16),
    /// Inspection worked but no mapping is visible yet.
    Pending,
    /// Inspection itself failed.
    Failed,
}

/// Fixed-interval, fixed-budget port-mapping poller.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    interval: Duration,
    budget: Duration,
}

impl ReadinessPoller {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self { interval, budget }
    }

    /// Inspect once.
    pub async fn probe(
        runtime: &dyn ContainerRuntime,
        container: &str,
        internal_port: u16,
    ) -> Probe {
        match runtime.inspect_host_port(container, internal_port).await {
            Ok(Some(port)) if port != 0 => Probe::Mapped(port),
            Ok(_) => Probe::Pending,
            Err(e) => {
                debug!(%container, error = %e, "inspect failed; will retry");
                Probe::Failed
            }
        }
    }

    /// Poll until a host port is mapped for `internal_port`.
    pub async fn wait_for_port(
        &self,
        runtime: &dyn ContainerRuntime,
        container: &str,
        internal_port: u16,
    ) -> DriverResult<u16> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Probe::Mapped(port) = Self::probe(runtime, container, internal_port).await {
                debug!(%container, internal_port, host_port = port, attempts, "port mapping observed");
                return Ok(port);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.budget {
                return Err(DriverError::ReadinessTimeout {
                    port: internal_port,
                    waited: self.budget,
                    attempts,
                });
            }
            tokio::time::sleep(self.interval.min(self.budget - elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;
    use crate::runtime::{labels_for, ContainerSpec};

    fn poller() -> ReadinessPoller {
        ReadinessPoller::new(Duration::from_millis(5), Duration::from_millis(200))
    }

    async fn started(rt: &MockRuntime) -> String {
        rt.run_container(&ContainerSpec {
            name: "c".to_string(),
            image: "postgres:15".to_string(),
            env: vec![],
            internal_port: 5432,
            volume: None,
            labels: labels_for("d"),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn returns_first_observed_port() {
        let rt = MockRuntime::new();
        let c = started(&rt).await;
        let port = poller().wait_for_port(&rt, &c, 5432).await.unwrap();
        assert_ne!(port, 5432);
    }

    #[tokio::test]
    async fn waits_for_late_mapping() {
        let rt = MockRuntime::new().with_port_mapping_after(4);
        let c = started(&rt).await;
        assert!(poller().wait_for_port(&rt, &c, 5432).await.is_ok());
    }

    #[tokio::test]
    async fn swallows_transient_errors() {
        let rt = MockRuntime::new().with_inspect_errors(3);
        let c = started(&rt).await;
        assert!(poller().wait_for_port(&rt, &c, 5432).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_container_is_retried_until_timeout() {
        let rt = MockRuntime::new();
        let poller = ReadinessPoller::new(Duration::from_millis(5), Duration::from_millis(30));
        let err = poller.wait_for_port(&rt, "missing", 5432).await.unwrap_err();
        assert!(matches!(err, DriverError::ReadinessTimeout { .. }));
    }

    #[tokio::test]
    async fn times_out_without_mapping() {
        let rt = MockRuntime::new().without_port_mapping();
        let c = started(&rt).await;
        let poller = ReadinessPoller::new(Duration::from_millis(10), Duration::from_millis(50));

        let begin = std::time::Instant::now();
        let err = poller.wait_for_port(&rt, &c, 5432).await.unwrap_err();
        assert!(begin.elapsed() >= Duration::from_millis(50));
        assert!(err.to_string().contains("timeout"));
        match err {
            DriverError::ReadinessTimeout { port, attempts, .. } => {
                assert_eq!(port, 5432);
                assert!(attempts >= 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
