//! Kubernetes backend.
//!
//! Each deploy task is a `batch/v1` Job named after the deployment, with no
//! retries and a pod that is never restarted. Creating a Job whose name is
//! taken reports the existing one.

use async_trait::async_trait;
use furnace_core::backend::{ComputeBackend, ExecutionTaskSpec, TaskHandle};
use furnace_core::{Error, Result};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::Client;
use kube::api::{Api, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use tracing::info;

const CONFLICT: u16 = 409;
const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
const TASK_LABEL: &str = "furnace/task";

/// Runs deploy tasks as Kubernetes Jobs.
pub struct KubernetesBackend {
    client: Client,
    namespace: String,
}

impl KubernetesBackend {
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    pub fn with_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

fn build_job(spec: &ExecutionTaskSpec) -> Job {
    let labels = BTreeMap::from([
        (MANAGED_BY.to_string(), "furnace".to_string()),
        (TASK_LABEL.to_string(), spec.name.clone()),
    ]);

    let env = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let quantities = BTreeMap::from([
        (
            "cpu".to_string(),
            Quantity(format!("{}m", spec.resources.cpu_millis)),
        ),
        (
            "memory".to_string(),
            Quantity(format!("{}Mi", spec.resources.memory_mib)),
        ),
    ]);

    let container = Container {
        name: "deploy".to_string(),
        image: Some(spec.image.clone()),
        env: Some(env),
        resources: Some(ResourceRequirements {
            requests: Some(quantities.clone()),
            limits: Some(quantities),
            ..Default::default()
        }),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ComputeBackend for KubernetesBackend {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn launch(&self, spec: ExecutionTaskSpec) -> Result<TaskHandle> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &self.namespace);
        let job = build_job(&spec);

        info!(job = %spec.name, namespace = %self.namespace, "Creating job");
        let already_running = match jobs.create(&PostParams::default(), &job).await {
            Ok(_) => false,
            Err(kube::Error::Api(response)) if response.code == CONFLICT => true,
            Err(e) => return Err(Error::Launch(format!("Failed to create job: {}", e))),
        };

        Ok(TaskHandle {
            task_id: format!("{}/{}", self.namespace, spec.name),
            backend: self.name().to_string(),
            already_running,
        })
    }
}
