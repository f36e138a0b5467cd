//! Inbound request classification.
//!
//! Every request arriving at the trigger endpoint is classified into exactly
//! one [`EnvelopeKind`] before authentication. Routing fields are read into a
//! [`WebhookEnvelope`] only once the request is authenticated.

use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::stack::StackSource;
use crate::{DeploymentEvent, Error, Result};

/// An inbound trigger request. Immutable once received.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    headers: BTreeMap<String, String>,
    raw_body: Bytes,
}

impl IncomingRequest {
    /// Header names are stored lowercased.
    pub fn new<I, K, V>(headers: I, raw_body: impl Into<Bytes>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
            raw_body: raw_body.into(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    /// Parse the body as JSON.
    pub fn parsed_body(&self) -> Result<Value> {
        serde_json::from_slice(&self.raw_body)
            .map_err(|e| Error::MalformedRequest(format!("invalid JSON: {}", e)))
    }
}

/// How the origin of a request is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// `x-hub-signature` HMAC over the raw body.
    WebhookSignature,
    /// `x-api-key` shared key.
    ApiKey,
}

/// Where a trigger came from, with the routing fields it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOrigin {
    /// Provider webhook carrying a repository object. The manifest's first
    /// environment is the target.
    Webhook { source: StackSource },
    /// Direct API/CLI call naming the environment explicitly.
    Api {
        source: StackSource,
        environment: String,
    },
}

impl TriggerOrigin {
    pub fn source(&self) -> &StackSource {
        match self {
            TriggerOrigin::Webhook { source } | TriggerOrigin::Api { source, .. } => source,
        }
    }

    /// Caller-specified environment, if any.
    pub fn requested_environment(&self) -> Option<&str> {
        match self {
            TriggerOrigin::Webhook { .. } => None,
            TriggerOrigin::Api { environment, .. } => Some(environment),
        }
    }
}

/// Which kind of request arrived, decided from the payload shape alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    DeploymentCreated,
    PingHook,
    WebhookTrigger,
    ApiTrigger,
}

impl EnvelopeKind {
    /// Verification mode required before acting on this kind of request.
    pub fn auth_kind(self) -> AuthKind {
        match self {
            EnvelopeKind::ApiTrigger => AuthKind::ApiKey,
            _ => AuthKind::WebhookSignature,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::DeploymentCreated => "deployment_created",
            EnvelopeKind::PingHook => "ping",
            EnvelopeKind::WebhookTrigger => "webhook_trigger",
            EnvelopeKind::ApiTrigger => "api_trigger",
        }
    }
}

/// Classified inbound request with its routing fields extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEnvelope {
    /// The provider registered a deployment; dispatch it to the exec stage.
    DeploymentCreated(DeploymentEvent),
    /// The provider's test hook.
    PingHook,
    /// A request to register a new deployment.
    DirectTrigger(TriggerOrigin),
}

impl WebhookEnvelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            WebhookEnvelope::DeploymentCreated(_) => EnvelopeKind::DeploymentCreated,
            WebhookEnvelope::PingHook => EnvelopeKind::PingHook,
            WebhookEnvelope::DirectTrigger(TriggerOrigin::Webhook { .. }) => {
                EnvelopeKind::WebhookTrigger
            }
            WebhookEnvelope::DirectTrigger(TriggerOrigin::Api { .. }) => EnvelopeKind::ApiTrigger,
        }
    }
}

/// A request whose kind is known but whose routing fields have not been
/// read yet.
///
/// Fields are only extracted by [`ClassifiedRequest::into_envelope`], after
/// authentication, so an unauthenticated caller never learns which fields
/// are required.
#[derive(Debug, Clone)]
pub struct ClassifiedRequest {
    kind: EnvelopeKind,
    body: Value,
}

impl ClassifiedRequest {
    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn auth_kind(&self) -> AuthKind {
        self.kind.auth_kind()
    }

    /// Extract the routing fields for this kind of request.
    pub fn into_envelope(self) -> Result<WebhookEnvelope> {
        let body = &self.body;
        match self.kind {
            EnvelopeKind::DeploymentCreated => DeploymentEvent::from_github_payload(body)
                .map(WebhookEnvelope::DeploymentCreated)
                .ok_or_else(|| missing("deployment routing fields")),
            EnvelopeKind::PingHook => Ok(WebhookEnvelope::PingHook),
            EnvelopeKind::WebhookTrigger => {
                let repository =
                    present(body, "repository").ok_or_else(|| missing("repository"))?;
                let source = StackSource::from_github_repository(repository)
                    .ok_or_else(|| missing("repository owner, name or default branch"))?;
                Ok(WebhookEnvelope::DirectTrigger(TriggerOrigin::Webhook {
                    source,
                }))
            }
            EnvelopeKind::ApiTrigger => {
                let field = |key: &str| present_str(body, key).ok_or_else(|| missing(key));
                let source =
                    StackSource::from_remote_url(field("remoteUrl")?, field("commitRef")?)?;
                Ok(WebhookEnvelope::DirectTrigger(TriggerOrigin::Api {
                    source,
                    environment: field("environment")?.to_string(),
                }))
            }
        }
    }
}

/// Present and not `null`, `false` or an empty string.
fn present<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    body.get(key).filter(|v| match v {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    })
}

fn present_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    present(body, key).and_then(Value::as_str)
}

fn missing(what: &str) -> Error {
    Error::MalformedRequest(format!("request is missing {}", what))
}

/// Classify a request. Rules are evaluated in order; the first match wins.
pub fn classify(request: &IncomingRequest) -> Result<ClassifiedRequest> {
    classify_body(request.parsed_body()?)
}

/// Classify an already-parsed request body.
pub fn classify_body(body: Value) -> Result<ClassifiedRequest> {
    let hook_type = body
        .get("hook")
        .and_then(|h| h.get("type"))
        .and_then(Value::as_str);

    let kind = if present(&body, "deployment").is_some() {
        EnvelopeKind::DeploymentCreated
    } else if hook_type == Some("Repository") {
        EnvelopeKind::PingHook
    } else if present(&body, "repository").is_some() {
        EnvelopeKind::WebhookTrigger
    } else if ["remoteUrl", "commitRef", "environment"]
        .iter()
        .all(|key| present_str(&body, key).is_some())
    {
        EnvelopeKind::ApiTrigger
    } else {
        return Err(missing("some parameter"));
    };

    Ok(ClassifiedRequest { kind, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> IncomingRequest {
        IncomingRequest::new(
            [("X-Hub-Signature", "sha1=00")],
            serde_json::to_vec(&body).unwrap(),
        )
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = request(json!({}));
        assert_eq!(req.header("x-hub-signature"), Some("sha1=00"));
        assert_eq!(req.header("X-HUB-SIGNATURE"), Some("sha1=00"));
        assert_eq!(req.header("x-api-key"), None);
    }

    fn extract(body: Value) -> Result<WebhookEnvelope> {
        classify_body(body)?.into_envelope()
    }

    #[test]
    fn test_deployment_created() {
        let envelope = classify(&request(json!({
            "deployment": {"id": 7, "ref": "v1.2.0", "environment": "prod"},
            "repository": {"clone_url": "https://github.com/a/b.git"}
        })))
        .unwrap()
        .into_envelope()
        .unwrap();

        let WebhookEnvelope::DeploymentCreated(event) = envelope else {
            panic!("expected DeploymentCreated, got {:?}", envelope);
        };
        assert_eq!(event.deployment_id.as_str(), "7");
        assert_eq!(event.commit_ref, "v1.2.0");
        assert_eq!(event.environment, "prod");
        assert_eq!(event.remote_url, "https://github.com/a/b.git");
    }

    #[test]
    fn test_deployment_wins_over_hook_and_repository() {
        let classified = classify_body(json!({
            "deployment": {"id": 1, "ref": "main", "environment": "dev"},
            "hook": {"type": "Repository"},
            "repository": {"clone_url": "https://github.com/a/b"}
        }))
        .unwrap();
        assert_eq!(classified.kind(), EnvelopeKind::DeploymentCreated);
        assert_eq!(classified.auth_kind(), AuthKind::WebhookSignature);
    }

    #[test]
    fn test_incomplete_deployment_is_malformed_only_on_extraction() {
        let classified = classify_body(json!({
            "deployment": {"id": 1, "environment": "dev"},
            "repository": {"clone_url": "https://github.com/a/b"}
        }))
        .unwrap();
        assert_eq!(classified.kind(), EnvelopeKind::DeploymentCreated);

        let err = classified.into_envelope().unwrap_err();
        assert!(matches!(err, Error::MalformedRequest(_)));
    }

    #[test]
    fn test_incomplete_repository_is_malformed_only_on_extraction() {
        let classified = classify_body(json!({"repository": {"name": "b"}})).unwrap();
        assert_eq!(classified.kind(), EnvelopeKind::WebhookTrigger);
        assert_eq!(classified.auth_kind(), AuthKind::WebhookSignature);
        assert!(matches!(
            classified.into_envelope(),
            Err(Error::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_ping_hook() {
        let classified = classify_body(json!({"hook": {"type": "Repository"}})).unwrap();
        assert_eq!(classified.auth_kind(), AuthKind::WebhookSignature);
        assert_eq!(classified.into_envelope().unwrap(), WebhookEnvelope::PingHook);
    }

    #[test]
    fn test_non_repository_hook_is_malformed() {
        assert!(classify_body(json!({"hook": {"type": "Organization"}})).is_err());
    }

    #[test]
    fn test_null_deployment_falls_through_to_repository() {
        let envelope = extract(json!({
            "repository": {
                "clone_url": "https://github.com/a/b",
                "owner": {"login": "a"},
                "name": "b",
                "default_branch": "main"
            },
            "deployment": null
        }))
        .unwrap();

        assert_eq!(envelope.kind(), EnvelopeKind::WebhookTrigger);
        let WebhookEnvelope::DirectTrigger(origin) = envelope else {
            panic!("expected DirectTrigger");
        };
        assert_eq!(origin.source().git_ref, "main");
        assert_eq!(origin.requested_environment(), None);
    }

    #[test]
    fn test_api_trigger() {
        let classified = classify_body(json!({
            "remoteUrl": "https://github.com/o/r",
            "commitRef": "abc123",
            "environment": "prod"
        }))
        .unwrap();
        assert_eq!(classified.auth_kind(), AuthKind::ApiKey);

        let envelope = classified.into_envelope().unwrap();
        assert_eq!(
            envelope,
            WebhookEnvelope::DirectTrigger(TriggerOrigin::Api {
                source: StackSource {
                    owner: "o".to_string(),
                    repo: "r".to_string(),
                    git_ref: "abc123".to_string(),
                },
                environment: "prod".to_string(),
            })
        );
    }

    #[test]
    fn test_api_trigger_requires_all_fields() {
        let err = classify_body(json!({
            "remoteUrl": "https://github.com/o/r",
            "commitRef": "abc123",
            "environment": ""
        }))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedRequest(_)));
    }

    #[test]
    fn test_empty_and_invalid_bodies_are_malformed() {
        assert!(matches!(
            classify_body(json!({})),
            Err(Error::MalformedRequest(_))
        ));
        let req = IncomingRequest::new(Vec::<(&str, String)>::new(), "{not json");
        assert!(matches!(classify(&req), Err(Error::MalformedRequest(_))));
    }
}
