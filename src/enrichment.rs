//! Background hostname and geolocation lookups for discovered hops
//!
//! Each hop gets one task running its reverse DNS and geolocation lookups in
//! parallel. Requests for a hop that already has a task in flight are
//! dropped, so a hop is never looked up twice at the same time.

use crate::hop::SharedHop;
use crate::services::Services;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::trace;

/// Hop numbers with a lookup task in flight
#[derive(Debug, Clone, Default)]
struct InFlight {
    keys: Arc<Mutex<HashSet<u8>>>,
}

impl InFlight {
    fn claim(&self, key: u8) -> Option<InFlightGuard> {
        let inserted = self.keys.lock().expect("mutex poisoned").insert(key);
        inserted.then(|| InFlightGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    fn len(&self) -> usize {
        self.keys.lock().expect("mutex poisoned").len()
    }
}

struct InFlightGuard {
    keys: Arc<Mutex<HashSet<u8>>>,
    key: u8,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(&self.key);
        }
    }
}

/// Dispatches per-hop lookups as background tasks
#[derive(Clone)]
pub struct HopEnricher {
    services: Services,
    in_flight: InFlight,
}

impl HopEnricher {
    /// Create an enricher using the session services
    pub fn new(services: Services) -> Self {
        Self {
            services,
            in_flight: InFlight::default(),
        }
    }

    /// Start hostname and geolocation lookups for `hop`
    ///
    /// Returns `None` when a lookup for the same hop number is already
    /// running. Must be called from within a Tokio runtime.
    pub fn dispatch(&self, hop: &SharedHop) -> Option<JoinHandle<()>> {
        let hop_number = hop.lock().expect("mutex poisoned").hop_number;
        let Some(guard) = self.in_flight.claim(hop_number) else {
            trace!("Lookup for hop {hop_number} already in flight");
            return None;
        };

        let names = Arc::clone(&self.services.names);
        let geo = Arc::clone(&self.services.geo);
        let hop = Arc::clone(hop);
        Some(tokio::spawn(async move {
            let _guard = guard;
            tokio::join!(names.resolve_name(&hop), geo.lookup(&hop));
        }))
    }

    /// Number of hops with lookups in flight
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::dns::{ForwardResolver, NameResolutionService, PtrLookup, ReverseDnsError};
    use crate::geo::{GeoAsnLookupService, GeoProvider};
    use crate::hop::{HopRegistry, HopState};
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::time::Duration;

    struct SlowPtr;

    #[async_trait]
    impl PtrLookup for SlowPtr {
        async fn lookup_ptr(&self, _ip: IpAddr) -> Result<String, ReverseDnsError> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("hop.example".to_string())
        }
    }

    fn enricher() -> HopEnricher {
        let config = SessionConfig::default();
        let names = NameResolutionService::with_parts(
            ForwardResolver::with_providers(vec![]),
            Arc::new(SlowPtr),
            true,
        );
        let geo = GeoAsnLookupService::with_providers(Vec::<Arc<dyn GeoProvider>>::new());
        HopEnricher::new(Services::with_services(
            &config,
            None,
            Some(names),
            Some(geo),
        ))
    }

    #[tokio::test]
    async fn test_dispatch_populates_hop() {
        let enricher = enricher();
        let hop = HopRegistry::new().insert(HopState::new(1, "192.168.1.1".parse().unwrap()));

        enricher.dispatch(&hop).unwrap().await.unwrap();
        let state = hop.lock().unwrap().clone();
        assert_eq!(state.hostname, "hop.example");
        assert_eq!(state.location, crate::geo::LOCAL_NETWORK);
        assert_eq!(enricher.pending(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_dispatch_is_dropped() {
        let enricher = enricher();
        let hop = HopRegistry::new().insert(HopState::new(4, "10.1.1.1".parse().unwrap()));

        let first = enricher.dispatch(&hop).unwrap();
        assert!(enricher.dispatch(&hop).is_none());
        assert_eq!(enricher.pending(), 1);

        first.await.unwrap();
        assert_eq!(enricher.pending(), 0);
        assert!(enricher.dispatch(&hop).is_some());
    }
}
