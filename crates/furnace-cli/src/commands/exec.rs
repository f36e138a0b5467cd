//! Exec stage consumer.

use super::{launcher, mqtt_bus, require_mqtt, secret_resolver, shutdown_signal};
use anyhow::{Context, Result};
use furnace_bus::EventConsumer;
use furnace_config::{CommonSettings, ExecSettings};
use std::sync::Arc;

/// Consume deployment events from the MQTT bus and launch deploy tasks.
pub async fn run(common: CommonSettings, exec: ExecSettings) -> Result<()> {
    common.validate()?;
    exec.validate()?;
    require_mqtt(&common.bus)?;

    let secrets = secret_resolver(&common)?;
    let launcher = launcher(&common, &exec, secrets).await?;

    // Connect once the backend is ready; queued events are held until the
    // consumer subscribes.
    let client_id = format!("furnace-{}-exec", common.instance);
    let bus = mqtt_bus(&common.bus, &client_id, true)?;
    let consumer = EventConsumer::new(
        bus,
        &common.bus.topic,
        Arc::new(launcher),
        exec.dedupe_window,
    );
    let messages = consumer.subscribe().await?;

    tokio::select! {
        result = consumer.consume(messages) => result.context("Exec consumer stopped")?,
        _ = shutdown_signal() => {}
    }

    Ok(())
}
