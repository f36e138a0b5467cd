//! Trigger endpoint for source-control webhooks and direct API calls.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use furnace_core::envelope::{self, AuthKind, IncomingRequest, WebhookEnvelope};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(trigger))
}

/// Handle a trigger request.
async fn trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = IncomingRequest::new(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        body,
    );
    process_trigger(&state, &request).await
}

async fn process_trigger(
    state: &AppState,
    request: &IncomingRequest,
) -> Result<Json<Value>, ApiError> {
    let classified = envelope::classify(request)?;
    let kind = classified.kind().as_str();
    let auth_kind = classified.auth_kind();

    info!(kind, "Received trigger");

    if !state.authenticator.verify(auth_kind, request).await {
        warn!(kind, "Trigger authentication failed");
        let msg = match auth_kind {
            AuthKind::WebhookSignature => "Github signature validation failed",
            AuthKind::ApiKey => "API KEY validation failed",
        };
        return Err(ApiError::Forbidden(msg.to_string()));
    }

    match classified.into_envelope()? {
        WebhookEnvelope::PingHook => {
            info!("Github test hook received");
            Ok(Json(json!({ "msg": "Github test hook received" })))
        }
        WebhookEnvelope::DeploymentCreated(event) => {
            let message_id = state.dispatcher.dispatch(&event).await?;
            info!(
                message_id = %message_id,
                deployment_id = %event.deployment_id,
                "Deployment successfully started"
            );
            Ok(Json(json!({ "msg": "Deployment successfully started" })))
        }
        WebhookEnvelope::DirectTrigger(origin) => {
            let target = state.resolver.resolve_target(&origin).await?;
            let deployment_id = state.registrar.register(&target).await?;
            info!(
                deployment_id = %deployment_id,
                environment = %target.environment,
                "Deployment successfully triggered"
            );
            Ok(Json(json!({ "msg": "Deployment successfully triggered" })))
        }
    }
}
