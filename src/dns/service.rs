//! Name resolution service
//!
//! Forward resolution of the target and reverse resolution of hop addresses,
//! both degrading to the literal address text instead of failing.

use super::forward::ForwardResolver;
use super::reverse::PtrLookup;
use super::servers::build_resolver;
use crate::config::{DnsServer, IpPreference};
use crate::error::ResolveError;
use crate::hop::{PendingFlag, PendingKind, SharedHop};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Forward and reverse DNS for a session
///
/// # Examples
///
/// ```no_run
/// use mtroute::config::{DnsServer, IpPreference};
/// use mtroute::dns::NameResolutionService;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let names = NameResolutionService::new(DnsServer::Cloudflare, true);
///     let addr = names.resolve("example.com", IpPreference::PreferIpv4).await?;
///     println!("example.com -> {addr}");
///     Ok(())
/// }
/// ```
pub struct NameResolutionService {
    forward: ForwardResolver,
    ptr: Arc<dyn PtrLookup>,
    resolve_names: bool,
}

impl NameResolutionService {
    /// Create a service querying `server`
    pub fn new(server: DnsServer, resolve_names: bool) -> Self {
        let resolver = Arc::new(build_resolver(server));
        Self {
            forward: ForwardResolver::new(Arc::clone(&resolver)),
            ptr: resolver,
            resolve_names,
        }
    }

    /// Create a service from custom forward and reverse implementations
    pub fn with_parts(forward: ForwardResolver, ptr: Arc<dyn PtrLookup>, resolve_names: bool) -> Self {
        Self {
            forward,
            ptr,
            resolve_names,
        }
    }

    /// Whether reverse lookups are enabled
    pub fn resolve_names(&self) -> bool {
        self.resolve_names
    }

    /// Resolve a host name or literal address to a single address
    pub async fn resolve(&self, host: &str, preference: IpPreference) -> Result<IpAddr, ResolveError> {
        self.forward.resolve(host, preference).await
    }

    /// Fill in the hop's hostname
    ///
    /// Hops without an address are left untouched. When reverse lookups are
    /// disabled the hostname becomes the address text. A call made while a
    /// lookup for the same hop is in flight does nothing.
    pub async fn resolve_name(&self, hop: &SharedHop) {
        let address = {
            let mut state = hop.lock().expect("mutex poisoned");
            let Some(address) = state.address else {
                return;
            };
            if !self.resolve_names {
                state.hostname = address.to_string();
                return;
            }
            address
        };

        let Some(_pending) = PendingFlag::try_raise(hop, PendingKind::Hostname) else {
            return;
        };
        let hostname = match self.ptr.lookup_ptr(address).await {
            Ok(name) => name,
            Err(e) => {
                debug!("Reverse lookup for {address} failed: {e}");
                address.to_string()
            }
        };
        hop.lock().expect("mutex poisoned").hostname = hostname;
    }
}
