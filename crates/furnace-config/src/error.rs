//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for furnace_core::Error {
    fn from(err: ConfigError) -> Self {
        furnace_core::Error::InvalidManifest(err.to_string())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
