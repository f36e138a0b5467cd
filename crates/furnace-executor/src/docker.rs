//! Local Docker backend.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{Config, CreateContainerOptions, StartContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use furnace_core::backend::{ComputeBackend, ExecutionTaskSpec, TaskHandle};
use furnace_core::{Error, Result};
use futures::StreamExt;
use tracing::{debug, info, warn};

const CONFLICT: u16 = 409;

/// Runs deploy tasks as containers on the local Docker daemon.
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Pull warning");
                }
            }
        }
    }

    /// The container's id, for a name that already exists.
    async fn existing_id(&self, name: &str) -> String {
        match self.docker.inspect_container(name, None).await {
            Ok(inspect) => inspect.id.unwrap_or_else(|| name.to_string()),
            Err(e) => {
                warn!(container = %name, error = %e, "Failed to inspect existing container");
                name.to_string()
            }
        }
    }
}

/// Container configuration for a task: one-shot, never restarted.
fn container_config(spec: &ExecutionTaskSpec) -> Config<String> {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let host_config = HostConfig {
        nano_cpus: Some(i64::from(spec.resources.cpu_millis) * 1_000_000),
        memory: Some(i64::from(spec.resources.memory_mib) * 1024 * 1024),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn is_conflict(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError { status_code, .. } if *status_code == CONFLICT
    )
}

#[async_trait]
impl ComputeBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, spec: ExecutionTaskSpec) -> Result<TaskHandle> {
        self.pull(&spec.image).await;

        let create_options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        info!(container = %spec.name, "Creating container");
        let container = match self
            .docker
            .create_container(Some(create_options), container_config(&spec))
            .await
        {
            Ok(container) => container,
            Err(e) if is_conflict(&e) => {
                return Ok(TaskHandle {
                    task_id: self.existing_id(&spec.name).await,
                    backend: self.name().to_string(),
                    already_running: true,
                });
            }
            Err(e) => {
                return Err(Error::Launch(format!("Failed to create container: {}", e)));
            }
        };

        info!(container = %spec.name, "Starting container");
        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Launch(format!("Failed to start container: {}", e)))?;

        Ok(TaskHandle {
            task_id: container.id,
            backend: self.name().to_string(),
            already_running: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use furnace_core::backend::ResourceRequest;
    use std::collections::BTreeMap;

    fn spec() -> ExecutionTaskSpec {
        ExecutionTaskSpec {
            name: "furnace-deploy-42".to_string(),
            image: "alpine:latest".to_string(),
            env: BTreeMap::from([
                ("GIT_TAG".to_string(), "abc123".to_string()),
                ("STACK_ENV".to_string(), "staging".to_string()),
            ]),
            resources: ResourceRequest::default(),
        }
    }

    #[test]
    fn test_container_config() {
        let config = container_config(&spec());
        assert_eq!(config.image.as_deref(), Some("alpine:latest"));
        assert_eq!(
            config.env,
            Some(vec![
                "GIT_TAG=abc123".to_string(),
                "STACK_ENV=staging".to_string()
            ])
        );

        let host = config.host_config.unwrap();
        assert_eq!(host.nano_cpus, Some(1_000_000_000));
        assert_eq!(host.memory, Some(1536 * 1024 * 1024));
        assert_eq!(
            host.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::NO)
        );
    }

    #[test]
    fn test_conflict_detection() {
        let conflict = DockerError::DockerResponseServerError {
            status_code: 409,
            message: "Conflict. The container name is already in use".to_string(),
        };
        let missing = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such image".to_string(),
        };
        assert!(is_conflict(&conflict));
        assert!(!is_conflict(&missing));
    }
}

/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use furnace_core::backend::ResourceRequest;
    use std::collections::BTreeMap;

    #[tokio::test]
    #[ignore]
    async fn test_launch_twice_starts_one_container() {
        let backend = DockerBackend::new().unwrap();
        let spec = ExecutionTaskSpec {
            name: format!("furnace-it-{}", std::process::id()),
            image: "alpine:latest".to_string(),
            env: BTreeMap::from([("STACK_ENV".to_string(), "test".to_string())]),
            resources: ResourceRequest::default(),
        };

        let first = backend.launch(spec.clone()).await.unwrap();
        let second = backend.launch(spec.clone()).await.unwrap();
        assert!(!first.already_running);
        assert!(second.already_running);
        assert_eq!(first.task_id, second.task_id);

        let _ = backend
            .docker
            .remove_container(
                &spec.name,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
    }
}
