//! Process settings.
//!
//! Every setting can be given as a flag or through its environment variable.
//! Settings are validated once at startup; a missing or inconsistent value is
//! fatal before any request is served.

use clap::{Args, ValueEnum};
use furnace_core::backend::{ResourceRequest, env_vars};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SecretBackendKind {
    /// Process environment variables.
    Env,
    /// One file per secret in a directory.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusKind {
    /// In-process channel; only meaningful when both stages share a process.
    Memory,
    /// MQTT broker.
    Mqtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Local Docker daemon.
    Docker,
    /// Kubernetes batch Jobs.
    Kubernetes,
}

/// Secret store selection.
#[derive(Debug, Clone, Args)]
pub struct SecretSettings {
    /// Secret store backend
    #[arg(
        id = "secret_backend",
        long = "secret-backend",
        env = "FURNACE_SECRET_BACKEND",
        value_enum,
        default_value = "env"
    )]
    pub backend: SecretBackendKind,

    /// Namespace prefix prepended to every secret name
    #[arg(long = "secret-prefix", env = "FURNACE_SECRET_PREFIX")]
    pub prefix: String,

    /// Directory holding secret files (file backend)
    #[arg(long = "secret-dir", env = "FURNACE_SECRET_DIR")]
    pub dir: Option<PathBuf>,
}

impl SecretSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.backend == SecretBackendKind::File && self.dir.is_none() {
            return Err(ConfigError::MissingField(
                "FURNACE_SECRET_DIR (required by the file secret backend)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Message bus selection.
#[derive(Debug, Clone, Args)]
pub struct BusSettings {
    /// Topic deployment events are published to
    #[arg(long, env = "FURNACE_TOPIC")]
    pub topic: String,

    /// Message bus backend
    #[arg(long = "bus", env = "FURNACE_BUS", value_enum, default_value = "mqtt")]
    pub kind: BusKind,

    /// Broker URL, e.g. mqtt://broker:1883 (mqtt bus)
    #[arg(long = "mqtt-url", env = "FURNACE_MQTT_URL")]
    pub mqtt_url: Option<Url>,
}

impl BusSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingField("FURNACE_TOPIC".to_string()));
        }
        if self.kind == BusKind::Mqtt {
            let Some(url) = &self.mqtt_url else {
                return Err(ConfigError::MissingField(
                    "FURNACE_MQTT_URL (required by the mqtt bus)".to_string(),
                ));
            };
            if !matches!(url.scheme(), "mqtt" | "tcp") || url.host_str().is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "FURNACE_MQTT_URL".to_string(),
                    message: format!("expected mqtt://host:port, got {}", url),
                });
            }
        }
        Ok(())
    }
}

/// Settings shared by both stages.
#[derive(Debug, Clone, Args)]
pub struct CommonSettings {
    /// Name of this Furnace installation
    #[arg(long, env = "FURNACE_INSTANCE")]
    pub instance: String,

    /// Timeout for metadata calls (secrets, manifest, registration, publish)
    #[arg(
        long = "request-timeout-secs",
        env = "FURNACE_REQUEST_TIMEOUT_SECS",
        default_value_t = 10
    )]
    pub request_timeout_secs: u64,

    #[command(flatten)]
    pub secrets: SecretSettings,

    #[command(flatten)]
    pub bus: BusSettings,
}

impl CommonSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.instance.trim().is_empty() {
            return Err(ConfigError::MissingField("FURNACE_INSTANCE".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "FURNACE_REQUEST_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        self.secrets.validate()?;
        self.bus.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Trigger stage settings.
#[derive(Debug, Clone, Args)]
pub struct TriggerSettings {
    /// Address the trigger endpoint listens on
    #[arg(long, env = "FURNACE_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Source-control REST API base URL
    #[arg(
        long = "github-api-url",
        env = "FURNACE_GITHUB_API_URL",
        default_value = "https://api.github.com"
    )]
    pub github_api_url: Url,

    /// Base URL serving raw repository files
    #[arg(
        long = "github-raw-url",
        env = "FURNACE_GITHUB_RAW_URL",
        default_value = "https://raw.githubusercontent.com"
    )]
    pub github_raw_url: Url,

    /// Manifest path inside the stack repository
    #[arg(
        long = "manifest-path",
        env = "FURNACE_MANIFEST_PATH",
        default_value = "stack.yaml"
    )]
    pub manifest_path: String,

    /// Ref sent when registering a deployment
    #[arg(
        long = "default-branch",
        env = "FURNACE_DEFAULT_BRANCH",
        default_value = "master"
    )]
    pub default_branch: String,

    /// Reject direct triggers naming an environment the manifest does not declare
    #[arg(long = "validate-environment", env = "FURNACE_VALIDATE_ENVIRONMENT")]
    pub validate_environment: bool,

    /// Fail resolution when the GitToken secret is absent
    #[arg(long = "require-git-token", env = "FURNACE_REQUIRE_GIT_TOKEN")]
    pub require_git_token: bool,
}

impl TriggerSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.manifest_path.trim().is_empty() {
            return Err(ConfigError::MissingField("FURNACE_MANIFEST_PATH".to_string()));
        }
        if self.default_branch.trim().is_empty() {
            return Err(ConfigError::MissingField("FURNACE_DEFAULT_BRANCH".to_string()));
        }
        Ok(())
    }
}

/// A secret resolved at launch and exposed to the task as an env variable,
/// written `SecretName=ENV_VAR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSecret {
    pub secret: String,
    pub variable: String,
}

impl FromStr for TaskSecret {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (secret, variable) = s
            .split_once('=')
            .ok_or_else(|| format!("expected SecretName=ENV_VAR, got {:?}", s))?;
        let (secret, variable) = (secret.trim(), variable.trim());
        if secret.is_empty() || variable.is_empty() {
            return Err(format!("expected SecretName=ENV_VAR, got {:?}", s));
        }
        Ok(Self {
            secret: secret.to_string(),
            variable: variable.to_string(),
        })
    }
}

/// Exec stage settings.
#[derive(Debug, Clone, Args)]
pub struct ExecSettings {
    /// Compute backend that runs deploy tasks
    #[arg(long, env = "FURNACE_BACKEND", value_enum, default_value = "docker")]
    pub backend: BackendKind,

    /// Kubernetes namespace for deploy jobs
    #[arg(long, env = "FURNACE_NAMESPACE", default_value = "furnace")]
    pub namespace: String,

    /// Deploy container image
    #[arg(long = "deploy-image", env = "FURNACE_DEPLOY_IMAGE")]
    pub deploy_image: String,

    /// Username the deploy container clones with
    #[arg(long = "git-username", env = "GIT_USERNAME", default_value = "unset")]
    pub git_username: String,

    /// Process variables copied unchanged into the task (region, buckets, KMS ids...)
    #[arg(
        long = "passthrough-env",
        env = "FURNACE_PASSTHROUGH_ENV",
        value_delimiter = ','
    )]
    pub passthrough_env: Vec<String>,

    /// Secrets exposed to the task, as SecretName=ENV_VAR
    #[arg(
        long = "task-secret",
        env = "FURNACE_TASK_SECRETS",
        value_delimiter = ',',
        default_value = "GitToken=GIT_TOKEN"
    )]
    pub task_secrets: Vec<TaskSecret>,

    /// CPU requested per task, in millicores
    #[arg(long = "task-cpu-millis", env = "FURNACE_TASK_CPU_MILLIS", default_value_t = 1000)]
    pub cpu_millis: u32,

    /// Memory requested per task, in MiB
    #[arg(long = "task-memory-mib", env = "FURNACE_TASK_MEMORY_MIB", default_value_t = 1536)]
    pub memory_mib: u32,

    /// Timeout for a single task launch
    #[arg(
        long = "launch-timeout-secs",
        env = "FURNACE_LAUNCH_TIMEOUT_SECS",
        default_value_t = 120
    )]
    pub launch_timeout_secs: u64,

    /// Number of recent deployment ids remembered for duplicate suppression
    #[arg(long = "dedupe-window", env = "FURNACE_DEDUPE_WINDOW", default_value_t = 1024)]
    pub dedupe_window: usize,
}

impl ExecSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.deploy_image.trim().is_empty() {
            return Err(ConfigError::MissingField("FURNACE_DEPLOY_IMAGE".to_string()));
        }
        if self.cpu_millis == 0 || self.memory_mib == 0 {
            return Err(ConfigError::InvalidValue {
                field: "task resources".to_string(),
                message: "cpu and memory must be greater than zero".to_string(),
            });
        }
        if self.launch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "FURNACE_LAUNCH_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        let overridden = self
            .passthrough_env
            .iter()
            .map(String::as_str)
            .chain(self.task_secrets.iter().map(|s| s.variable.as_str()))
            .find(|name| env_vars::RESERVED.contains(name));
        if let Some(name) = overridden {
            return Err(ConfigError::InvalidValue {
                field: name.to_string(),
                message: "is part of the deploy container contract and cannot be overridden"
                    .to_string(),
            });
        }
        Ok(())
    }

    pub fn resources(&self) -> ResourceRequest {
        ResourceRequest {
            cpu_millis: self.cpu_millis,
            memory_mib: self.memory_mib,
        }
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    /// Read pass-through variables from the process environment, skipping
    /// unset or empty ones.
    pub fn passthrough_values(&self) -> BTreeMap<String, String> {
        self.passthrough_env
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .filter_map(|name| {
                std::env::var(name)
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(|v| (name.to_string(), v))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        common: CommonSettings,
        #[command(flatten)]
        trigger: TriggerSettings,
        #[command(flatten)]
        exec: ExecSettings,
    }

    fn parse(args: &[&str]) -> Result<TestCli, clap::Error> {
        let base = [
            "furnace",
            "--instance",
            "prod",
            "--topic",
            "deployments",
            "--secret-prefix",
            "FURNACE_",
            "--deploy-image",
            "furnace/deploy:latest",
        ];
        TestCli::try_parse_from(base.iter().chain(args.iter()))
    }

    #[test]
    fn test_settings_compose_without_conflicts() {
        use clap::CommandFactory;
        TestCli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--bus", "memory"]).unwrap();
        assert_eq!(cli.trigger.default_branch, "master");
        assert_eq!(cli.trigger.manifest_path, "stack.yaml");
        assert!(!cli.trigger.validate_environment);
        assert_eq!(cli.common.request_timeout(), Duration::from_secs(10));
        assert_eq!(cli.exec.backend, BackendKind::Docker);
        assert_eq!(cli.exec.git_username, "unset");
        assert_eq!(
            cli.exec.task_secrets,
            vec![TaskSecret {
                secret: "GitToken".to_string(),
                variable: "GIT_TOKEN".to_string(),
            }]
        );
        cli.common.validate().unwrap();
        cli.trigger.validate().unwrap();
        cli.exec.validate().unwrap();
    }

    #[test]
    fn test_missing_required_value_fails_parse() {
        let result = TestCli::try_parse_from(["furnace", "--instance", "prod"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mqtt_bus_requires_url() {
        let cli = parse(&["--bus", "mqtt"]).unwrap();
        assert!(matches!(
            cli.common.validate(),
            Err(ConfigError::MissingField(_))
        ));

        let cli = parse(&["--bus", "mqtt", "--mqtt-url", "mqtt://broker:1883"]).unwrap();
        cli.common.validate().unwrap();

        let cli = parse(&["--bus", "mqtt", "--mqtt-url", "https://broker"]).unwrap();
        assert!(matches!(
            cli.common.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_file_secret_backend_requires_dir() {
        let cli = parse(&["--bus", "memory", "--secret-backend", "file"]).unwrap();
        assert!(cli.common.validate().is_err());

        let cli = parse(&[
            "--bus",
            "memory",
            "--secret-backend",
            "file",
            "--secret-dir",
            "/run/secrets",
        ])
        .unwrap();
        cli.common.validate().unwrap();
    }

    #[test]
    fn test_passthrough_cannot_override_contract() {
        let cli = parse(&[
            "--bus",
            "memory",
            "--passthrough-env",
            "STACK_REGION,STACK_ENV",
        ])
        .unwrap();
        assert!(matches!(
            cli.exec.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "STACK_ENV"
        ));
    }

    #[test]
    fn test_task_secret_parsing() {
        let secret: TaskSecret = "RegistryToken=REGISTRY_TOKEN".parse().unwrap();
        assert_eq!(secret.secret, "RegistryToken");
        assert_eq!(secret.variable, "REGISTRY_TOKEN");
        assert!("RegistryToken".parse::<TaskSecret>().is_err());
        assert!("=X".parse::<TaskSecret>().is_err());
    }

    #[test]
    fn test_passthrough_values_skip_unset() {
        let cli = parse(&[
            "--bus",
            "memory",
            "--passthrough-env",
            "FURNACE_TEST_SURELY_UNSET_VARIABLE",
        ])
        .unwrap();
        assert!(cli.exec.passthrough_values().is_empty());
    }
}
