//! Service container for a diagnostics session
//!
//! Groups the three collaborators every phase needs: the ICMP transport,
//! name resolution and geolocation. Services are thread-safe internally, so
//! no outer locking is needed.

use crate::config::SessionConfig;
use crate::dns::NameResolutionService;
use crate::geo::GeoAsnLookupService;
use crate::icmp::{IcmpTransport, SystemIcmpTransport};
use std::sync::Arc;

/// Container for all services used by a session
///
/// # Examples
///
/// ```no_run
/// use mtroute::config::SessionConfig;
/// use mtroute::services::Services;
///
/// let services = Services::from_config(&SessionConfig::default());
/// assert!(services.names.resolve_names());
/// ```
#[derive(Clone)]
pub struct Services {
    /// ICMP echo transport
    pub transport: Arc<dyn IcmpTransport>,
    /// Forward and reverse DNS
    pub names: Arc<NameResolutionService>,
    /// ASN and geolocation lookups
    pub geo: Arc<GeoAsnLookupService>,
}

impl Services {
    /// Create the system services described by `config`
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_services(config, None, None, None)
    }

    /// Create services with optional custom implementations
    ///
    /// Any service not provided is created from `config`.
    pub fn with_services(
        config: &SessionConfig,
        transport: Option<Arc<dyn IcmpTransport>>,
        names: Option<NameResolutionService>,
        geo: Option<GeoAsnLookupService>,
    ) -> Self {
        let transport =
            transport.unwrap_or_else(|| Arc::new(SystemIcmpTransport::new()) as Arc<dyn IcmpTransport>);
        let names = names.unwrap_or_else(|| {
            NameResolutionService::new(config.dns_server, config.resolve_names)
        });
        let geo = geo.unwrap_or_else(|| GeoAsnLookupService::new(config.timing.http_timeout));
        Self {
            transport,
            names: Arc::new(names),
            geo: Arc::new(geo),
        }
    }
}
