//! mtroute - live network path diagnostics
//!
//! This library discovers the route to a host, monitors every hop
//! concurrently in the style of MTR, surveys per-hop loss in the style of
//! PathPing and explains where along the path a problem most likely starts.
//!
//! A [`SessionController`] ties the phases together. Presentation layers
//! consume [`SessionEvent`]s and poll [`SessionHandle::snapshot`] and
//! [`SessionHandle::diagnose`]; they never mutate hop state.

pub mod analyzer;
pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod dns;
pub mod enrichment;
pub mod error;
pub mod events;
pub mod geo;
pub mod history;
pub mod hop;
pub mod icmp;
pub mod monitor;
pub mod services;
pub mod session;

// Re-export core types for library users
pub use analyzer::{HopSummary, PathQualityAnalyzer};
pub use config::{DnsServer, IpPreference, SessionConfig, SessionConfigBuilder, TimingConfig};
pub use diagnostics::{evaluate, Finding, Severity};
pub use discovery::RouteDiscovery;
pub use error::{
    DiscoveryError, GeoLookupError, ResolveError, SessionError, TransportError,
};
pub use events::{EventSink, SessionEvent};
pub use history::RecentHosts;
pub use hop::{HopRegistry, HopState, NetworkClass, SharedHop};
pub use icmp::{IcmpTransport, ProbeOutcome, ProbeRequest, ProbeResult, SystemIcmpTransport};
pub use monitor::ConcurrentMonitor;
pub use services::Services;
pub use session::{SessionController, SessionHandle};
