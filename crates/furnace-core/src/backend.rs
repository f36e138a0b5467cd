//! Compute backend trait and task types.
//!
//! Backends start the container that checks out a stack and deploys it
//! (containers, Kubernetes jobs, etc.)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{DeploymentId, Result};

/// Environment variables every deploy container receives.
pub mod env_vars {
    pub const GIT_REMOTE: &str = "GIT_REMOTE";
    pub const GIT_TAG: &str = "GIT_TAG";
    pub const GIT_USERNAME: &str = "GIT_USERNAME";
    pub const STACK_ENV: &str = "STACK_ENV";
    pub const DEPLOYMENT_ID: &str = "DEPLOYMENT_ID";
    pub const FURNACE_INSTANCE: &str = "FURNACE_INSTANCE";

    /// Names that configuration may not override.
    pub const RESERVED: [&str; 6] = [
        GIT_REMOTE,
        GIT_TAG,
        GIT_USERNAME,
        STACK_ENV,
        DEPLOYMENT_ID,
        FURNACE_INSTANCE,
    ];
}

/// Specification for one deployment task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTaskSpec {
    /// Task name, unique per deployment id.
    pub name: String,
    /// Deploy container image.
    pub image: String,
    /// Environment variables handed to the container.
    pub env: BTreeMap<String, String>,
    /// Resource request.
    pub resources: ResourceRequest,
}

/// CPU and memory requested for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_millis: u32,
    pub memory_mib: u32,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            cpu_millis: 1000,
            memory_mib: 1536,
        }
    }
}

/// Handle to a launched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Backend-specific identifier (container ID, job name).
    pub task_id: String,
    /// Name of the backend running this task.
    pub backend: String,
    /// The backend already had a task for this deployment; nothing new started.
    pub already_running: bool,
}

const MAX_TASK_NAME: usize = 63;

fn dns_safe(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Build a task name that is valid as a container name and as a DNS-1123
/// label: lowercase alphanumerics and `-`, at most 63 characters.
///
/// The `deploy-<id>` suffix is kept whole; a long instance name is cut
/// instead, so distinct deployments never share a name.
pub fn task_name(instance: &str, deployment_id: &DeploymentId) -> String {
    let mut suffix = format!("deploy-{}", dns_safe(deployment_id.as_str()));
    if suffix.len() > MAX_TASK_NAME {
        suffix = suffix.split_off(suffix.len() - MAX_TASK_NAME);
    }

    let room = MAX_TASK_NAME.saturating_sub(suffix.len() + 1);
    let mut prefix = dns_safe(instance);
    prefix.truncate(room);
    let prefix = prefix.trim_matches('-');

    let name = if prefix.is_empty() {
        suffix
    } else {
        format!("{}-{}", prefix, suffix)
    };
    name.trim_matches('-').to_string()
}

/// Trait for compute backends.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Start exactly one task for `spec`.
    ///
    /// Launching a spec whose name already exists must not start a second
    /// task; it returns a handle with `already_running` set.
    async fn launch(&self, spec: ExecutionTaskSpec) -> Result<TaskHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_name_is_dns_safe() {
        let name = task_name("Furnace_Prod", &DeploymentId::from("42"));
        assert_eq!(name, "furnace-prod-deploy-42");
    }

    #[test]
    fn test_task_name_is_truncated() {
        let name = task_name(&"x".repeat(80), &DeploymentId::from("1"));
        assert_eq!(name.len(), 63);
        assert!(name.ends_with("-deploy-1"));
    }

    #[test]
    fn test_long_instance_keeps_deployments_apart() {
        let instance = "acme-platform-infrastructure-production-eu-west-1a-blue";
        let first = task_name(instance, &DeploymentId::from(1001u64));
        let second = task_name(instance, &DeploymentId::from(1002u64));

        assert_ne!(first, second);
        assert!(first.len() <= 63);
        assert!(first.ends_with("-deploy-1001"));
        assert!(second.ends_with("-deploy-1002"));
    }

    #[test]
    fn test_oversized_id_keeps_its_tail() {
        let id = DeploymentId::from(format!("{}-7", "a".repeat(70)).as_str());
        let name = task_name("furnace", &id);
        assert_eq!(name.len(), 63);
        assert!(name.ends_with("a-7"));
    }

    #[test]
    fn test_default_resources() {
        let resources = ResourceRequest::default();
        assert_eq!(resources.cpu_millis, 1000);
        assert_eq!(resources.memory_mib, 1536);
    }
}
