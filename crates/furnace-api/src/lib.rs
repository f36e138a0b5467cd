//! Trigger stage for Furnace.
//!
//! Provides the HTTP endpoint that authenticates deployment triggers,
//! resolves target environments, registers deployments with the
//! source-control provider and dispatches registered deployments to the
//! exec stage.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
