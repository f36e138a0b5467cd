//! Configuration for Furnace.
//!
//! This crate handles:
//! - Stack manifest parsing (stack.yaml)
//! - Process settings sourced from flags and environment variables

pub mod error;
pub mod manifest;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use manifest::{load_manifest, parse_manifest};
pub use system::{
    BackendKind, BusKind, BusSettings, CommonSettings, ExecSettings, SecretBackendKind,
    SecretSettings, TaskSecret, TriggerSettings,
};
