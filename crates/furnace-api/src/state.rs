//! Application state.

use crate::services::{Authenticator, DeploymentRegistrar, Dispatcher, EnvironmentResolver};
use std::sync::Arc;

/// Shared application state.
///
/// Collaborators are built once at start and shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub resolver: Arc<EnvironmentResolver>,
    pub registrar: Arc<DeploymentRegistrar>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(
        authenticator: Authenticator,
        resolver: EnvironmentResolver,
        registrar: DeploymentRegistrar,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            resolver: Arc::new(resolver),
            registrar: Arc::new(registrar),
            dispatcher: Arc::new(dispatcher),
        }
    }
}
