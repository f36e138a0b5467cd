//! Recording fakes for the source-control provider and message bus.

use async_trait::async_trait;
use bytes::Bytes;
use furnace_core::bus::MessageBus;
use furnace_core::source_control::{DeploymentRequest, SourceControl};
use furnace_core::{DeploymentId, Error, MessageId, Result};
use futures::stream::{self, BoxStream};
use secrecy::SecretString;
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeSourceControl {
    manifest: Option<String>,
    failing: bool,
    reject_deployments: bool,
    fetches: Mutex<Vec<String>>,
    deployments: Mutex<Vec<(DeploymentRequest, bool)>>,
}

impl FakeSourceControl {
    pub fn with_manifest(yaml: &str) -> Self {
        Self {
            manifest: Some(yaml.to_string()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn rejecting_deployments(mut self) -> Self {
        self.reject_deployments = true;
        self
    }

    /// `owner/repo@ref:path (token|anonymous)` per fetch.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    /// Deployment requests and whether each carried a token.
    pub fn deployments(&self) -> Vec<(DeploymentRequest, bool)> {
        self.deployments.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
        token: Option<&SecretString>,
    ) -> Result<Option<Bytes>> {
        if self.failing {
            return Err(Error::Unavailable("provider is down".to_string()));
        }
        let auth = if token.is_some() { "token" } else { "anonymous" };
        self.fetches
            .lock()
            .unwrap()
            .push(format!("{}/{}@{}:{} ({})", owner, repo, git_ref, path, auth));
        Ok(self.manifest.clone().map(Bytes::from))
    }

    async fn create_deployment(
        &self,
        request: &DeploymentRequest,
        token: Option<&SecretString>,
    ) -> Result<DeploymentId> {
        if self.failing || self.reject_deployments {
            return Err(Error::Unavailable("422 Unprocessable Entity".to_string()));
        }
        let mut deployments = self.deployments.lock().unwrap();
        deployments.push((request.clone(), token.is_some()));
        Ok(DeploymentId::from(1000 + deployments.len() as u64))
    }
}

#[derive(Default)]
pub struct FakeBus {
    failing: bool,
    published: Mutex<Vec<(String, Bytes)>>,
}

impl FakeBus {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for FakeBus {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<MessageId> {
        if self.failing {
            return Err(Error::Unavailable("broker unreachable".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(MessageId::generate())
    }

    async fn subscribe(&self, _topic: &str) -> Result<BoxStream<'static, Bytes>> {
        Ok(Box::pin(stream::empty()))
    }
}
