//! DNS resolution
//!
//! Forward lookups walk a provider chain (platform resolver, then the
//! configured server); reverse lookups fill hop hostnames.

pub mod forward;
pub mod reverse;
pub mod servers;
pub mod service;

pub use forward::{AddressProvider, ForwardResolver};
pub use reverse::{PtrLookup, ReverseDnsError};
pub use service::NameResolutionService;
