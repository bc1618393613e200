//! Hop model shared across a session

mod network;
mod registry;
mod state;

pub use network::NetworkClass;
pub use registry::{HopRegistry, PendingFlag, PendingKind, SharedHop};
pub use state::{population_std_dev, HopState, NOT_AVAILABLE, NO_ADDRESS, NO_RESPONSE_HOSTNAME};
