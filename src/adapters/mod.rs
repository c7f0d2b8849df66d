//! Shared subsystem-lifecycle primitives, reused by the Snapcast transport
//! supervisor and the notification sinks.

pub mod traits;

pub use traits::*;
