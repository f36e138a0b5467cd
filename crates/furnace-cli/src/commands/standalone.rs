//! Both stages in one process.

use super::{app_state, launcher, secret_resolver};
use crate::commands::serve::serve_http;
use anyhow::Result;
use furnace_bus::{EventConsumer, MemoryBus};
use furnace_config::{BusKind, CommonSettings, ExecSettings, TriggerSettings};
use furnace_core::bus::MessageBus;
use std::sync::Arc;
use tracing::info;

/// Run the trigger endpoint and the exec consumer over the in-memory bus.
pub async fn run(
    mut common: CommonSettings,
    trigger: TriggerSettings,
    exec: ExecSettings,
) -> Result<()> {
    common.bus.kind = BusKind::Memory;
    common.validate()?;
    trigger.validate()?;
    exec.validate()?;

    let secrets = secret_resolver(&common)?;
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let launcher = launcher(&common, &exec, secrets.clone()).await?;
    let consumer = Arc::new(EventConsumer::new(
        bus.clone(),
        &common.bus.topic,
        Arc::new(launcher),
        exec.dedupe_window,
    ));

    // Subscribe before serving so no published event is missed.
    let messages = consumer.subscribe().await?;
    let consuming = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.consume(messages).await })
    };
    info!(topic = %common.bus.topic, "Standalone mode using the in-memory bus");

    let state = app_state(&common, &trigger, secrets, bus)?;
    let served = serve_http(trigger.listen, state).await;

    consuming.abort();
    served
}
