//! Deployment registration with the source-control provider.
//!
//! Registering a deployment makes the provider emit a deployment webhook,
//! which re-enters the trigger endpoint and is dispatched from there.

use furnace_core::error::with_timeout;
use furnace_core::secret::{GIT_TOKEN, SecretResolver};
use furnace_core::source_control::{DeploymentRequest, SourceControl};
use furnace_core::stack::DeploymentTarget;
use furnace_core::{DeploymentId, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct DeploymentRegistrar {
    source_control: Arc<dyn SourceControl>,
    secrets: SecretResolver,
    default_branch: String,
    timeout: Duration,
}

impl DeploymentRegistrar {
    pub fn new(
        source_control: Arc<dyn SourceControl>,
        secrets: SecretResolver,
        default_branch: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            source_control,
            secrets,
            default_branch: default_branch.into(),
            timeout,
        }
    }

    /// Register a deployment of `target`.
    ///
    /// The registered ref is the configured default branch, not the ref the
    /// manifest was read at.
    pub async fn register(&self, target: &DeploymentTarget) -> Result<DeploymentId> {
        let request = DeploymentRequest {
            owner: target.owner.clone(),
            repo: target.repo.clone(),
            git_ref: self.default_branch.clone(),
            environment: target.environment.clone(),
        };
        let token = self.secrets.resolve(GIT_TOKEN).await;

        let create = self.source_control.create_deployment(&request, token.as_ref());
        let deployment_id = with_timeout(self.timeout, "deployment registration", create)
            .await
            .map_err(|e| Error::Registration(e.to_string()))?;

        info!(
            owner = %request.owner,
            repo = %request.repo,
            environment = %request.environment,
            deployment_id = %deployment_id,
            provider = self.source_control.name(),
            "Registered deployment"
        );
        Ok(deployment_id)
    }
}
