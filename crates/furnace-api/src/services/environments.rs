//! Environment resolution from the stack manifest.

use furnace_core::envelope::TriggerOrigin;
use furnace_core::error::with_timeout;
use furnace_core::secret::{GIT_TOKEN, SecretResolver};
use furnace_core::source_control::SourceControl;
use furnace_core::stack::{DeploymentTarget, StackManifest, StackSource};
use furnace_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolves which environment a trigger deploys to.
pub struct EnvironmentResolver {
    source_control: Arc<dyn SourceControl>,
    secrets: SecretResolver,
    manifest_path: String,
    timeout: Duration,
    validate_environment: bool,
    require_git_token: bool,
}

impl EnvironmentResolver {
    pub fn new(
        source_control: Arc<dyn SourceControl>,
        secrets: SecretResolver,
        manifest_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            source_control,
            secrets,
            manifest_path: manifest_path.into(),
            timeout,
            validate_environment: false,
            require_git_token: false,
        }
    }

    /// Reject caller-supplied environments the manifest does not declare.
    pub fn with_environment_validation(mut self, enabled: bool) -> Self {
        self.validate_environment = enabled;
        self
    }

    /// Fail instead of fetching anonymously when `GitToken` is absent.
    pub fn with_required_git_token(mut self, required: bool) -> Self {
        self.require_git_token = required;
        self
    }

    /// Fetch and parse the manifest for `source`.
    pub async fn resolve_environments(&self, source: &StackSource) -> Result<StackManifest> {
        let token = self.secrets.resolve(GIT_TOKEN).await;
        if token.is_none() {
            if self.require_git_token {
                return Err(Error::ManifestUnreachable(
                    "GitToken secret is required but not configured".to_string(),
                ));
            }
            debug!("No GitToken configured; fetching manifest anonymously");
        }

        let fetch = self.source_control.fetch_file(
            &source.owner,
            &source.repo,
            &source.git_ref,
            &self.manifest_path,
            token.as_ref(),
        );
        let contents = with_timeout(self.timeout, "manifest fetch", fetch)
            .await
            .map_err(|e| Error::ManifestUnreachable(e.to_string()))?
            .ok_or_else(|| {
                Error::ManifestUnreachable(format!(
                    "{} not found in {}/{} at {}",
                    self.manifest_path, source.owner, source.repo, source.git_ref
                ))
            })?;

        let text = std::str::from_utf8(&contents)
            .map_err(|e| Error::InvalidManifest(format!("manifest is not UTF-8: {}", e)))?;

        Ok(furnace_config::parse_manifest(text)?)
    }

    /// Resolve the full deployment target for a trigger.
    ///
    /// Webhook triggers deploy to the manifest's first environment; API
    /// triggers deploy to the environment they name.
    pub async fn resolve_target(&self, origin: &TriggerOrigin) -> Result<DeploymentTarget> {
        let source = origin.source();
        let manifest = self.resolve_environments(source).await?;

        let environment = match origin.requested_environment() {
            None => manifest.default_environment().to_string(),
            Some(requested) => {
                if !manifest.declares(requested) {
                    if self.validate_environment {
                        return Err(Error::MalformedRequest(format!(
                            "environment {} is not declared in {}",
                            requested, self.manifest_path
                        )));
                    }
                    warn!(
                        environment = %requested,
                        declared = ?manifest.environments(),
                        "Requested environment not declared in manifest"
                    );
                }
                requested.to_string()
            }
        };

        info!(
            owner = %source.owner,
            repo = %source.repo,
            git_ref = %source.git_ref,
            environment = %environment,
            "Resolved deployment target"
        );

        Ok(source.clone().with_environment(environment))
    }
}
