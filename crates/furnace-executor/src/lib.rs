//! Exec stage for Furnace.
//!
//! Turns a [`DeploymentEvent`](furnace_core::DeploymentEvent) into exactly
//! one deploy task on a compute backend:
//! - Kubernetes jobs (production)
//! - Local Docker containers (development, standalone mode)

pub mod docker;
pub mod kubernetes;
pub mod launcher;

pub use docker::DockerBackend;
pub use kubernetes::KubernetesBackend;
pub use launcher::{ExecutionLauncher, LaunchConfig};

pub use furnace_core::backend::{ComputeBackend, ExecutionTaskSpec, ResourceRequest, TaskHandle};
