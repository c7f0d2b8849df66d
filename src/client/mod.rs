pub mod manager;

pub use manager::{scale_group_volumes, ClientManager};
