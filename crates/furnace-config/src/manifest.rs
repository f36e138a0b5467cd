//! Stack manifest parsing.
//!
//! A stack repository declares its deployment environments in YAML:
//!
//! ```yaml
//! environments:
//!   - staging
//!   - prod
//! ```
//!
//! Other top-level keys are allowed and ignored here.

use furnace_core::stack::StackManifest;
use serde_yaml::Value;
use std::path::Path;

use crate::{ConfigError, ConfigResult};

/// Parse a stack manifest from YAML text.
pub fn parse_manifest(yaml: &str) -> ConfigResult<StackManifest> {
    if yaml.trim().is_empty() {
        return Err(ConfigError::MissingField("environments".to_string()));
    }

    let doc: Value = serde_yaml::from_str(yaml)?;
    let environments = match doc.get("environments") {
        None | Some(Value::Null) => {
            return Err(ConfigError::MissingField("environments".to_string()));
        }
        Some(Value::Sequence(items)) => items
            .iter()
            .map(environment_name)
            .collect::<ConfigResult<Vec<_>>>()?,
        Some(_) => {
            return Err(ConfigError::InvalidValue {
                field: "environments".to_string(),
                message: "expected a list of environment names".to_string(),
            });
        }
    };

    StackManifest::new(environments).map_err(|_| ConfigError::InvalidValue {
        field: "environments".to_string(),
        message: "at least one environment is required".to_string(),
    })
}

fn environment_name(item: &Value) -> ConfigResult<String> {
    let name = match item {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if name.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "environments".to_string(),
            message: format!("not an environment name: {:?}", item),
        });
    }
    Ok(name)
}

/// Read and parse a manifest from disk.
pub fn load_manifest(path: impl AsRef<Path>) -> ConfigResult<StackManifest> {
    let yaml = std::fs::read_to_string(path)?;
    parse_manifest(&yaml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ordered_environments() {
        let manifest = parse_manifest("environments:\n  - staging\n  - prod\n").unwrap();
        assert_eq!(manifest.environments(), vec!["staging", "prod"]);
        assert_eq!(manifest.default_environment(), "staging");
    }

    #[test]
    fn test_other_keys_are_ignored() {
        let yaml = "name: my-stack\n\
                    platform: aws\n\
                    environments:\n  - dev\n\
                    state:\n  bucket: somewhere\n";
        let manifest = parse_manifest(yaml).unwrap();
        assert_eq!(manifest.environments(), vec!["dev"]);
    }

    #[test]
    fn test_missing_environments_key() {
        let err = parse_manifest("name: my-stack\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "environments"));
    }

    #[test]
    fn test_empty_environments_list() {
        let err = parse_manifest("environments: []\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_null_environments() {
        assert!(matches!(
            parse_manifest("environments:\n"),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_empty_document() {
        assert!(matches!(parse_manifest(""), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_scalar_environments_rejected() {
        assert!(matches!(
            parse_manifest("environments: prod\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_unparsable_yaml() {
        assert!(matches!(
            parse_manifest("environments: [staging\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_manifest_errors_map_to_resolution_errors() {
        let err: furnace_core::Error = parse_manifest("environments: []").unwrap_err().into();
        assert!(err.is_resolution());
    }
}
