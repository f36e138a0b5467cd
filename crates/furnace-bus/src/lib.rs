//! Message bus for Furnace.
//!
//! Carries [`DeploymentEvent`](furnace_core::DeploymentEvent) payloads from
//! the trigger stage to the exec stage:
//! - MQTT (production)
//! - In-memory broadcast (standalone mode, tests)

pub mod memory;
pub mod mqtt;
pub mod worker;

pub use memory::MemoryBus;
pub use mqtt::MqttBus;
pub use worker::EventConsumer;

pub use furnace_core::bus::MessageBus;
