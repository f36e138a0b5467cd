//! CLI command implementations.

pub mod exec;
pub mod serve;
pub mod standalone;
pub mod trigger;

use anyhow::{Context, Result};
use furnace_api::AppState;
use furnace_api::services::{
    Authenticator, DeploymentRegistrar, Dispatcher, EnvironmentResolver, GitHubClient,
};
use furnace_bus::MqttBus;
use furnace_config::{
    BackendKind, BusKind, BusSettings, CommonSettings, ExecSettings, SecretBackendKind,
    SecretSettings, TriggerSettings,
};
use furnace_core::bus::MessageBus;
use furnace_core::secret::{EnvSecretStore, FileSecretStore, SecretResolver, SecretStore};
use furnace_executor::{
    ComputeBackend, DockerBackend, ExecutionLauncher, KubernetesBackend, LaunchConfig,
};
use std::sync::Arc;
use tracing::info;

/// Parse a manifest file and print the environments it declares.
pub fn validate(path: &str) -> Result<()> {
    match furnace_config::load_manifest(path) {
        Ok(manifest) => {
            println!("Manifest is valid");
            println!("Default environment: {}", manifest.default_environment());
            for environment in manifest.environments() {
                println!("  - {}", environment);
            }
            Ok(())
        }
        Err(e) => {
            println!("Manifest error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Serve and exec talk to each other through a broker; the in-memory bus
/// only exists inside one process.
fn require_mqtt(bus: &BusSettings) -> Result<()> {
    if bus.kind != BusKind::Mqtt {
        anyhow::bail!("the memory bus is only available in standalone mode");
    }
    Ok(())
}

fn secret_resolver(common: &CommonSettings) -> Result<SecretResolver> {
    let settings: &SecretSettings = &common.secrets;
    let store: Arc<dyn SecretStore> = match settings.backend {
        SecretBackendKind::Env => Arc::new(EnvSecretStore::new(&settings.prefix)),
        SecretBackendKind::File => {
            let dir = settings
                .dir
                .clone()
                .context("FURNACE_SECRET_DIR is required by the file secret backend")?;
            Arc::new(FileSecretStore::new(dir, &settings.prefix))
        }
    };
    info!(store = store.name(), prefix = %settings.prefix, "Secret store configured");
    Ok(SecretResolver::new(store, common.request_timeout()))
}

fn mqtt_bus(
    bus: &BusSettings,
    client_id: &str,
    persistent_session: bool,
) -> Result<Arc<dyn MessageBus>> {
    let url = bus
        .mqtt_url
        .as_ref()
        .context("FURNACE_MQTT_URL is required by the mqtt bus")?;
    let bus = MqttBus::connect(url, client_id, persistent_session)
        .context("Failed to set up MQTT client")?;
    Ok(Arc::new(bus))
}

/// Build the trigger stage state around `bus`.
fn app_state(
    common: &CommonSettings,
    trigger: &TriggerSettings,
    secrets: SecretResolver,
    bus: Arc<dyn MessageBus>,
) -> Result<AppState> {
    let timeout = common.request_timeout();
    let github = Arc::new(
        GitHubClient::new(
            trigger.github_api_url.clone(),
            trigger.github_raw_url.clone(),
            timeout,
        )
        .context("Failed to build GitHub client")?,
    );

    let resolver =
        EnvironmentResolver::new(github.clone(), secrets.clone(), &trigger.manifest_path, timeout)
            .with_environment_validation(trigger.validate_environment)
            .with_required_git_token(trigger.require_git_token);
    let registrar =
        DeploymentRegistrar::new(github, secrets.clone(), &trigger.default_branch, timeout);
    let dispatcher = Dispatcher::new(bus, &common.bus.topic, timeout);

    Ok(AppState::new(
        Authenticator::new(secrets),
        resolver,
        registrar,
        dispatcher,
    ))
}

/// Build the exec stage launcher with the configured compute backend.
async fn launcher(
    common: &CommonSettings,
    exec: &ExecSettings,
    secrets: SecretResolver,
) -> Result<ExecutionLauncher> {
    let backend: Arc<dyn ComputeBackend> = match exec.backend {
        BackendKind::Docker => {
            Arc::new(DockerBackend::new().context("Failed to connect to Docker")?)
        }
        BackendKind::Kubernetes => Arc::new(
            KubernetesBackend::new(&exec.namespace)
                .await
                .context("Failed to connect to Kubernetes")?,
        ),
    };
    info!(backend = backend.name(), image = %exec.deploy_image, "Compute backend configured");

    Ok(ExecutionLauncher::new(
        backend,
        secrets,
        LaunchConfig::from_settings(common, exec),
    ))
}

/// Resolve on ctrl-c.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
