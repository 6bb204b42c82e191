//! deploydb-driver — realizing and destroying database instances.
//!
//! A [`BackendDriver`] turns a deployment plus its opened [`EngineConfig`]
//! into a [`ConnectionDescriptor`], and later tears the instance down again.
//!
//! - [`EmbeddedFileDriver`] creates a single data file per deployment.
//! - [`ContainerDriver`] runs a database server in a container through the
//!   [`ContainerRuntime`] seam, then waits on the [`ReadinessPoller`] for the
//!   host-side port mapping.
//!
//! [`DockerRuntime`] talks to a local Docker daemon via bollard;
//! [`MockRuntime`] is a scriptable in-process runtime for tests.
//!
//! [`EngineConfig`]: deploydb_core::EngineConfig
//! [`ConnectionDescriptor`]: deploydb_core::ConnectionDescriptor

pub mod container;
pub mod docker;
pub mod driver;
pub mod error;
pub mod file;
pub mod mock;
pub mod readiness;
pub mod runtime;

pub use container::{ContainerDriver, EngineProfile};
pub use docker::DockerRuntime;
pub use driver::{BackendDriver, StepOutcome, TeardownReport, TeardownStep};
pub use error::{DriverError, DriverResult};
pub use file::EmbeddedFileDriver;
pub use mock::{MockRuntime, RuntimeCall};
pub use readiness::ReadinessPoller;
pub use runtime::{ContainerRuntime, ContainerSpec, RuntimeError, RuntimeResult, VolumeMount};
