//! North-bound notification sinks: MQTT bridge, WebSocket hub, KNX bridge
//! (spec §6). Each subscribes to the notification bus independently; none
//! of them is required for the control plane to function.

pub mod knx;
pub mod mqtt;
pub mod ws;

pub use knx::{KnxBridge, NullKnxBridge};
pub use mqtt::MqttSink;
