//! Everything concerning the Snapcast server itself: the wire protocol,
//! the persistent transport, and the local state mirror.

pub mod protocol;
pub mod repository;
pub mod transport;
pub mod types;

pub use protocol::{SnapcastEventKind, SnapcastNotification};
pub use repository::{SharedSnapcastRepository, SnapcastStateRepository};
pub use transport::SnapcastTransport;
