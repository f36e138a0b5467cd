//! Core domain types and collaborator traits for Furnace.
//!
//! This crate contains:
//! - Identifiers for deployments and bus messages
//! - The deployment event contract shared by the trigger and exec stages
//! - Inbound request classification
//! - Stack manifest and deployment target types
//! - Collaborator traits (secret store, source control, message bus, compute backend)

pub mod backend;
pub mod bus;
pub mod envelope;
pub mod error;
pub mod event;
pub mod id;
pub mod secret;
pub mod source_control;
pub mod stack;

pub use error::{Error, Result};
pub use event::DeploymentEvent;
pub use id::{DeploymentId, MessageId};
