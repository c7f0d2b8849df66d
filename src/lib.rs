//! SnapDog - control-plane core for a Snapcast-based multi-room audio
//! installation.
//!
//! This library provides:
//! - A persistent JSON-RPC client to `snapserver`, with a local state
//!   mirror kept in sync via notifications and periodic resync
//! - Per-client and per-zone control surfaces (volume, mute, assignment,
//!   playback, playlists)
//! - MQTT and WebSocket notification sinks for downstream consumers
//! - An HTTP/JSON-RPC front door for external control

// =============================================================================
// Lints - Enforce code quality and consistency
// =============================================================================

// Deny truly dangerous patterns (these will fail the build)
#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Note: clippy::pedantic, clippy::nursery, and clippy::cargo are NOT enabled
// because they have hundreds of existing violations. Enable incrementally.

pub mod adapters;
pub mod api;
pub mod bus;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod media;
pub mod notify;
pub mod playlist;
pub mod snapcast;
pub mod store;
pub mod zone;
