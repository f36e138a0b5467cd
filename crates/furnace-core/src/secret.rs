//! Secret storage abstraction.
//!
//! Secrets are looked up by logical name for every request and never cached.
//! Lookup failures degrade to "absent"; callers that need a secret for
//! authentication must treat absence as a failed verification.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::with_timeout;
use crate::{Error, Result};

/// Shared secret used to sign provider webhooks.
pub const GIT_HOOK_SECRET: &str = "GitHookSecret";
/// Key expected in `x-api-key` on direct triggers.
pub const API_KEY: &str = "ApiKey";
/// Token for outbound source-control calls and repository checkout.
pub const GIT_TOKEN: &str = "GitToken";

/// Trait for secret storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Get a secret by logical name. `Ok(None)` means it is not configured.
    async fn get(&self, name: &str) -> Result<Option<SecretString>>;
}

/// Resolves logical secret names, folding every failure into "absent".
#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
    timeout: Duration,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Resolve `name`, returning `None` when absent, empty, failing or slow.
    pub async fn resolve(&self, name: &str) -> Option<SecretString> {
        let lookup = with_timeout(self.timeout, "secret lookup", self.store.get(name)).await;
        match lookup {
            Ok(Some(secret)) if !secrecy::ExposeSecret::expose_secret(&secret).is_empty() => {
                Some(secret)
            }
            Ok(_) => {
                debug!(secret = %name, store = self.store.name(), "Secret not configured");
                None
            }
            Err(e) => {
                warn!(
                    secret = %name,
                    store = self.store.name(),
                    error = %e,
                    "Secret lookup failed"
                );
                None
            }
        }
    }
}

/// Convert a logical name such as `GitHookSecret` to `GIT_HOOK_SECRET`.
fn screaming_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        if c == '-' || c == '.' {
            out.push('_');
        } else {
            out.push(c.to_ascii_uppercase());
        }
    }
    out
}

/// Reads secrets from process environment variables named
/// `<prefix><LOGICAL_NAME>`, e.g. `FURNACE_GIT_HOOK_SECRET`.
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, screaming_snake(name))
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn get(&self, name: &str) -> Result<Option<SecretString>> {
        match std::env::var(self.variable_name(name)) {
            Ok(value) => Ok(Some(SecretString::from(value))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(Error::Unavailable(e.to_string())),
        }
    }
}

/// Reads one secret per file from a directory (e.g. a mounted volume).
/// File names are `<prefix><LogicalName>`; surrounding whitespace is trimmed.
pub struct FileSecretStore {
    dir: PathBuf,
    prefix: String,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, name: &str) -> Result<Option<SecretString>> {
        let path = self.dir.join(format!("{}{}", self.prefix, name));
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(SecretString::from(contents.trim().to_string()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Unavailable(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// In-process secret store for standalone runs and tests.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(name.into(), value.into());
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, name: &str) -> Result<Option<SecretString>> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| Error::Internal("secret map poisoned".to_string()))?;
        Ok(secrets.get(name).cloned().map(SecretString::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    struct FailingStore;

    #[async_trait]
    impl SecretStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn get(&self, _name: &str) -> Result<Option<SecretString>> {
            Err(Error::Unavailable("vault is down".to_string()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl SecretStore for SlowStore {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn get(&self, _name: &str) -> Result<Option<SecretString>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(SecretString::from("late".to_string())))
        }
    }

    fn resolver(store: impl SecretStore + 'static) -> SecretResolver {
        SecretResolver::new(Arc::new(store), Duration::from_millis(50))
    }

    #[test]
    fn test_screaming_snake() {
        assert_eq!(screaming_snake("GitHookSecret"), "GIT_HOOK_SECRET");
        assert_eq!(screaming_snake("ApiKey"), "API_KEY");
        assert_eq!(screaming_snake("GitToken"), "GIT_TOKEN");
        assert_eq!(screaming_snake("docker-registry"), "DOCKER_REGISTRY");
    }

    #[tokio::test]
    async fn test_resolve_present_secret() {
        let resolver = resolver(MemorySecretStore::new().with_secret(API_KEY, "k3y"));
        let secret = resolver.resolve(API_KEY).await.unwrap();
        assert_eq!(secret.expose_secret(), "k3y");
    }

    #[tokio::test]
    async fn test_missing_and_empty_secrets_are_absent() {
        let resolver = resolver(MemorySecretStore::new().with_secret(GIT_TOKEN, ""));
        assert!(resolver.resolve(API_KEY).await.is_none());
        assert!(resolver.resolve(GIT_TOKEN).await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_absent() {
        assert!(resolver(FailingStore).resolve(API_KEY).await.is_none());
    }

    #[tokio::test]
    async fn test_slow_store_times_out_to_absent() {
        assert!(resolver(SlowStore).resolve(API_KEY).await.is_none());
    }

    #[tokio::test]
    async fn test_file_store_trims_contents() {
        let dir = std::env::temp_dir().join(format!("furnace-secrets-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("prod-GitToken"), "tok\n").await.unwrap();

        let store = FileSecretStore::new(&dir, "prod-");
        let token = store.get(GIT_TOKEN).await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "tok");
        assert!(store.get(API_KEY).await.unwrap().is_none());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn test_env_store_variable_name() {
        let store = EnvSecretStore::new("FURNACE_");
        assert_eq!(store.variable_name(GIT_HOOK_SECRET), "FURNACE_GIT_HOOK_SECRET");
    }
}
