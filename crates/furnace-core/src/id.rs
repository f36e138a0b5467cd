//! Identifiers.

use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Identifier of a deployment registered with the source-control provider.
///
/// Always serialized as a string. Providers report deployment ids as JSON
/// numbers, so deserialization accepts either form and normalizes to the
/// decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for DeploymentId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for DeploymentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDeploymentId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl<'de> Deserialize<'de> for DeploymentId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawDeploymentId::deserialize(deserializer)? {
            RawDeploymentId::Text(s) => Self(s),
            RawDeploymentId::Unsigned(n) => Self(n.to_string()),
            RawDeploymentId::Signed(n) => Self(n.to_string()),
        })
    }
}

/// Identifier assigned to a message published on the bus.
/// Uses UUIDv7 when the bus itself does not hand one back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct MessageId(String);

impl MessageId {
    /// Create a new time-ordered MessageId.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
