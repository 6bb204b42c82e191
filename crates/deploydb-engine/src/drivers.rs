//! Engine → driver registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use deploydb_core::{DaemonConfig, Engine};
use deploydb_driver::{
    BackendDriver, ContainerDriver, ContainerRuntime, EmbeddedFileDriver, EngineProfile,
    ReadinessPoller,
};

/// The drivers available to this process, keyed by engine.
///
/// An engine without a registered driver is accepted at creation and fails
/// once a worker picks it up.
#[derive(Clone, Default)]
pub struct DriverSet {
    drivers: HashMap<Engine, Arc<dyn BackendDriver>>,
}

impl DriverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the driver for `engine`.
    pub fn with(mut self, engine: Engine, driver: Arc<dyn BackendDriver>) -> Self {
        self.drivers.insert(engine, driver);
        self
    }

    pub fn get(&self, engine: Engine) -> Option<Arc<dyn BackendDriver>> {
        self.drivers.get(&engine).cloned()
    }

    /// Engines that have a driver, in declaration order.
    pub fn engines(&self) -> Vec<Engine> {
        Engine::ALL
            .into_iter()
            .filter(|e| self.drivers.contains_key(e))
            .collect()
    }

    /// Build the standard driver set from daemon configuration.
    ///
    /// Containerized engines are only registered when a runtime is given.
    pub fn from_config(config: &DaemonConfig, runtime: Option<Arc<dyn ContainerRuntime>>) -> Self {
        let mut set =
            Self::new().with(Engine::Sqlite, Arc::new(EmbeddedFileDriver::new(config.files_dir())));

        match runtime {
            Some(runtime) => {
                let poller =
                    ReadinessPoller::new(config.readiness_interval(), config.readiness_budget());
                for engine in Engine::ALL {
                    let Some(image) = config.image(engine) else {
                        continue;
                    };
                    let Some(profile) = EngineProfile::for_engine(engine, image) else {
                        continue;
                    };
                    let driver =
                        ContainerDriver::new(runtime.clone(), profile, poller, config.stop_grace());
                    set = set.with(engine, Arc::new(driver));
                }
            }
            None => warn!("no container runtime; mysql and postgres deployments will fail"),
        }

        info!(engines = ?set.engines(), "drivers registered");
        set
    }
}
