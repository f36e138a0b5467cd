//! Trigger stage services.

pub mod auth;
pub mod dispatcher;
pub mod environments;
pub mod github;
pub mod registrar;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::Authenticator;
pub use dispatcher::Dispatcher;
pub use environments::EnvironmentResolver;
pub use github::GitHubClient;
pub use registrar::DeploymentRegistrar;
