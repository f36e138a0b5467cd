//! Stack manifest and deployment target types.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default location of the manifest inside a stack repository.
pub const DEFAULT_MANIFEST_PATH: &str = "stack.yaml";

/// Repository-hosted declaration of the environments a stack deploys to.
///
/// Environments are ordered; the first one is the default deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStackManifest")]
pub struct StackManifest {
    environments: Vec<String>,
}

#[derive(Deserialize)]
struct RawStackManifest {
    #[serde(default)]
    environments: Vec<String>,
}

impl TryFrom<RawStackManifest> for StackManifest {
    type Error = Error;

    fn try_from(raw: RawStackManifest) -> Result<Self> {
        Self::new(raw.environments)
    }
}

impl StackManifest {
    /// Build a manifest, rejecting an empty environment list.
    pub fn new(environments: Vec<String>) -> Result<Self> {
        if environments.is_empty() {
            return Err(Error::InvalidManifest(
                "environments list is empty".to_string(),
            ));
        }
        Ok(Self { environments })
    }

    /// The environment authors declared first.
    pub fn default_environment(&self) -> &str {
        // `new` guarantees at least one entry.
        &self.environments[0]
    }

    pub fn environments(&self) -> &[String] {
        &self.environments
    }

    pub fn declares(&self, environment: &str) -> bool {
        self.environments.iter().any(|e| e == environment)
    }
}

/// Where a stack lives: repository coordinates plus the ref to read it at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSource {
    pub owner: String,
    pub repo: String,
    pub git_ref: String,
}

impl StackSource {
    /// Parse a caller-supplied remote such as `https://github.com/<owner>/<repo>`.
    ///
    /// A trailing `.git` on the repository segment is dropped.
    pub fn from_remote_url(remote_url: &str, commit_ref: &str) -> Result<Self> {
        let url = Url::parse(remote_url)
            .map_err(|e| Error::MalformedRequest(format!("invalid remoteUrl: {}", e)))?;

        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty());

        let (Some(owner), Some(repo)) = (segments.next(), segments.next()) else {
            return Err(Error::MalformedRequest(format!(
                "remoteUrl does not name an owner and repository: {}",
                remote_url
            )));
        };
        let repo = repo.strip_suffix(".git").unwrap_or(repo);

        if commit_ref.is_empty() {
            return Err(Error::MalformedRequest("commitRef is empty".to_string()));
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            git_ref: commit_ref.to_string(),
        })
    }

    /// Extract the source from a provider webhook `repository` object.
    ///
    /// The manifest is read at the repository's default branch.
    pub fn from_github_repository(repository: &serde_json::Value) -> Option<Self> {
        let non_empty = |v: Option<&serde_json::Value>| {
            v.and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Some(Self {
            owner: non_empty(repository.get("owner").and_then(|o| o.get("login")))?,
            repo: non_empty(repository.get("name"))?,
            git_ref: non_empty(repository.get("default_branch"))?,
        })
    }

    pub fn with_environment(self, environment: impl Into<String>) -> DeploymentTarget {
        DeploymentTarget {
            owner: self.owner,
            repo: self.repo,
            git_ref: self.git_ref,
            environment: environment.into(),
        }
    }
}

/// The resolved (owner, repo, ref, environment) tuple identifying where to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub owner: String,
    pub repo: String,
    pub git_ref: String,
    pub environment: String,
}
