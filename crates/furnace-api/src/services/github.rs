//! GitHub client for manifest fetches and deployment registration.

use async_trait::async_trait;
use bytes::Bytes;
use furnace_core::source_control::{DeploymentRequest, SourceControl};
use furnace_core::{DeploymentId, Result};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = "Project Furnace";

/// GitHub API client.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: Url,
    raw_url: Url,
}

impl GitHubClient {
    pub fn new(api_url: Url, raw_url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            raw_url,
        })
    }

    /// `<raw>/<owner>/<repo>/<ref>/<path>`; refs and paths may span segments.
    fn raw_file_url(&self, owner: &str, repo: &str, git_ref: &str, path: &str) -> Result<Url> {
        let mut url = self.raw_url.clone();
        url.path_segments_mut()
            .map_err(|_| GitHubError::Url(self.raw_url.to_string()))?
            .pop_if_empty()
            .push(owner)
            .push(repo)
            .extend(git_ref.split('/').filter(|s| !s.is_empty()))
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    /// `<api>/repos/<owner>/<repo>/deployments`
    fn deployments_url(&self, owner: &str, repo: &str) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| GitHubError::Url(self.api_url.to_string()))?
            .pop_if_empty()
            .extend(["repos", owner, repo, "deployments"]);
        Ok(url)
    }
}

/// Deployment creation response; only the id is needed.
#[derive(Debug, Deserialize)]
struct CreatedDeployment {
    id: DeploymentId,
}

#[async_trait]
impl SourceControl for GitHubClient {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
        token: Option<&SecretString>,
    ) -> Result<Option<Bytes>> {
        let url = self.raw_file_url(owner, repo, git_ref, path)?;
        debug!(url = %url, authenticated = token.is_some(), "Fetching file");

        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.header("Authorization", format!("token {}", token.expose_secret()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| GitHubError::Request(e.to_string()))?;
                Ok(Some(body))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                Err(GitHubError::Api(format!("Failed to fetch {} ({})", path, status)).into())
            }
        }
    }

    async fn create_deployment(
        &self,
        request: &DeploymentRequest,
        token: Option<&SecretString>,
    ) -> Result<DeploymentId> {
        let url = self.deployments_url(&request.owner, &request.repo)?;
        debug!(url = %url, environment = %request.environment, "Creating deployment");

        let mut builder = self
            .client
            .post(url)
            .header("Accept", "application/vnd.github.v3+json")
            .json(request);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token.expose_secret()));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to create deployment ({}): {}",
                status, text
            ))
            .into());
        }

        let created: CreatedDeployment = response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))?;
        Ok(created.id)
    }
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Base URL cannot carry a path: {0}")]
    Url(String),
}

impl From<GitHubError> for furnace_core::Error {
    fn from(err: GitHubError) -> Self {
        furnace_core::Error::Unavailable(err.to_string())
    }
}
