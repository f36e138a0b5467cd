//! Trigger stage server.

use super::{app_state, mqtt_bus, require_mqtt, secret_resolver, shutdown_signal};
use anyhow::Result;
use furnace_api::{AppState, routes};
use furnace_config::{CommonSettings, TriggerSettings};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Run the trigger endpoint, publishing to the MQTT bus.
pub async fn run(common: CommonSettings, trigger: TriggerSettings) -> Result<()> {
    common.validate()?;
    trigger.validate()?;
    require_mqtt(&common.bus)?;

    let secrets = secret_resolver(&common)?;
    // Publish-only client: unique id, clean session.
    let client_id = format!("furnace-{}-trigger-{}", common.instance, Uuid::new_v4().simple());
    let bus = mqtt_bus(&common.bus, &client_id, false)?;
    let state = app_state(&common, &trigger, secrets, bus)?;

    serve_http(trigger.listen, state).await
}

/// Serve the trigger router until ctrl-c.
pub(crate) async fn serve_http(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
