//! Source-control provider abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::{DeploymentId, Result};

/// Body of a deployment-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub owner: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub environment: String,
}

/// Trait for source-control providers hosting stack repositories.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Name of this provider.
    fn name(&self) -> &'static str;

    /// Fetch a file at `git_ref`. `Ok(None)` means the provider answered 404.
    async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
        token: Option<&SecretString>,
    ) -> Result<Option<Bytes>>;

    /// Register a deployment with the provider, which later emits a
    /// deployment webhook for it.
    async fn create_deployment(
        &self,
        request: &DeploymentRequest,
        token: Option<&SecretString>,
    ) -> Result<DeploymentId>;
}
