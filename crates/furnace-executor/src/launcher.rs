//! Builds deploy task specs and launches them on a compute backend.

use furnace_config::{CommonSettings, ExecSettings, TaskSecret};
use furnace_core::backend::{
    ComputeBackend, ExecutionTaskSpec, ResourceRequest, TaskHandle, env_vars, task_name,
};
use furnace_core::error::with_timeout;
use furnace_core::secret::SecretResolver;
use furnace_core::{DeploymentEvent, Error, Result};
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Static inputs to every launch.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub instance: String,
    pub image: String,
    pub git_username: String,
    /// Pass-through variables, already filtered of empty values.
    pub passthrough: BTreeMap<String, String>,
    pub task_secrets: Vec<TaskSecret>,
    pub resources: ResourceRequest,
    pub timeout: Duration,
}

impl LaunchConfig {
    /// Build from process settings, reading pass-through values from the
    /// environment once.
    pub fn from_settings(common: &CommonSettings, exec: &ExecSettings) -> Self {
        Self {
            instance: common.instance.clone(),
            image: exec.deploy_image.clone(),
            git_username: exec.git_username.clone(),
            passthrough: exec.passthrough_values(),
            task_secrets: exec.task_secrets.clone(),
            resources: exec.resources(),
            timeout: exec.launch_timeout(),
        }
    }
}

/// Starts one deploy task per deployment event.
pub struct ExecutionLauncher {
    backend: Arc<dyn ComputeBackend>,
    secrets: SecretResolver,
    config: LaunchConfig,
}

impl ExecutionLauncher {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        secrets: SecretResolver,
        config: LaunchConfig,
    ) -> Self {
        Self {
            backend,
            secrets,
            config,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Assemble the task environment for `event`.
    ///
    /// Contract variables are written last so nothing else can shadow them.
    pub async fn build_spec(&self, event: &DeploymentEvent) -> ExecutionTaskSpec {
        let mut env = self.config.passthrough.clone();

        for task_secret in &self.config.task_secrets {
            match self.secrets.resolve(&task_secret.secret).await {
                Some(value) => {
                    env.insert(
                        task_secret.variable.clone(),
                        value.expose_secret().to_string(),
                    );
                }
                None => {
                    warn!(
                        secret = %task_secret.secret,
                        variable = %task_secret.variable,
                        "Task secret unavailable; variable omitted"
                    );
                }
            }
        }

        let contract = [
            (env_vars::GIT_REMOTE, event.remote_url.as_str()),
            (env_vars::GIT_TAG, event.commit_ref.as_str()),
            (env_vars::GIT_USERNAME, self.config.git_username.as_str()),
            (env_vars::STACK_ENV, event.environment.as_str()),
            (env_vars::DEPLOYMENT_ID, event.deployment_id.as_str()),
            (env_vars::FURNACE_INSTANCE, self.config.instance.as_str()),
        ];
        for (name, value) in contract {
            env.insert(name.to_string(), value.to_string());
        }

        ExecutionTaskSpec {
            name: task_name(&self.config.instance, &event.deployment_id),
            image: self.config.image.clone(),
            env,
            resources: self.config.resources,
        }
    }

    /// Launch the deploy task for `event`.
    pub async fn launch(&self, event: &DeploymentEvent) -> Result<TaskHandle> {
        let spec = self.build_spec(event).await;
        debug!(task = %spec.name, vars = spec.env.len(), "Launching deploy task");

        let handle = with_timeout(self.config.timeout, "task launch", self.backend.launch(spec))
            .await
            .map_err(|e| match e {
                Error::Launch(_) => e,
                other => Error::Launch(other.to_string()),
            })?;

        if handle.already_running {
            info!(
                task_id = %handle.task_id,
                deployment_id = %event.deployment_id,
                "Deploy task already exists"
            );
        } else {
            info!(
                task_id = %handle.task_id,
                backend = %handle.backend,
                deployment_id = %event.deployment_id,
                environment = %event.environment,
                "Deploy task started"
            );
        }
        Ok(handle)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend that records specs and treats repeated names as running.
    #[derive(Default)]
    pub struct RecordingBackend {
        pub failing: bool,
        pub delay: Option<Duration>,
        pub(crate) launched: Mutex<Vec<ExecutionTaskSpec>>,
    }

    impl RecordingBackend {
        pub fn launched(&self) -> Vec<ExecutionTaskSpec> {
            self.launched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ComputeBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn launch(&self, spec: ExecutionTaskSpec) -> Result<TaskHandle> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing {
                return Err(Error::Unavailable("quota exceeded".to_string()));
            }
            let mut launched = self.launched.lock().unwrap();
            let already_running = launched.iter().any(|s| s.name == spec.name);
            let task_id = spec.name.clone();
            if !already_running {
                launched.push(spec);
            }
            Ok(TaskHandle {
                task_id,
                backend: "recording".to_string(),
                already_running,
            })
        }
    }

    pub fn config() -> LaunchConfig {
        LaunchConfig {
            instance: "furnace".to_string(),
            image: "furnace/deploy:latest".to_string(),
            git_username: "unset".to_string(),
            passthrough: BTreeMap::from([
                ("STACK_REGION".to_string(), "eu-west-1".to_string()),
                ("PLATFORM".to_string(), "aws".to_string()),
            ]),
            task_secrets: vec![TaskSecret {
                secret: "GitToken".to_string(),
                variable: "GIT_TOKEN".to_string(),
            }],
            resources: ResourceRequest::default(),
            timeout: Duration::from_secs(1),
        }
    }
}
