//! The deployment event placed on the message bus.
//!
//! This is the only contract between the trigger stage and the exec stage.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{DeploymentId, Error, Result};

/// Normalized payload describing a deployment ready to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    /// Clone URL of the stack repository.
    pub remote_url: String,
    /// Commit, tag or branch to check out.
    pub commit_ref: String,
    /// Deployment id assigned by the source-control provider.
    pub deployment_id: DeploymentId,
    /// Target environment name.
    pub environment: String,
}

impl DeploymentEvent {
    /// Build the event from a provider `deployment` webhook payload.
    ///
    /// Returns `None` when any routing field is missing.
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let deployment = payload.get("deployment")?;
        let remote_url = payload
            .get("repository")?
            .get("clone_url")?
            .as_str()
            .filter(|s| !s.is_empty())?;
        let commit_ref = deployment
            .get("ref")?
            .as_str()
            .filter(|s| !s.is_empty())?;
        let environment = deployment
            .get("environment")?
            .as_str()
            .filter(|s| !s.is_empty())?;
        let deployment_id: DeploymentId =
            serde_json::from_value(deployment.get("id")?.clone()).ok()?;

        Some(Self {
            remote_url: remote_url.to_string(),
            commit_ref: commit_ref.to_string(),
            deployment_id,
            environment: environment.to_string(),
        })
    }

    /// Encode as the JSON bus payload.
    pub fn to_payload(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| Error::Internal(format!("failed to encode deployment event: {}", e)))
    }

    /// Decode a JSON bus payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::MalformedRequest(format!("invalid deployment event: {}", e)))
    }
}
