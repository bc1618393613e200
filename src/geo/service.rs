//! Geolocation/ASN lookup service

use super::providers::{GeoApi, GeoInfo, GeoProvider, HttpGeoProvider};
use crate::error::GeoLookupError;
use crate::hop::{PendingFlag, PendingKind, SharedHop, NOT_AVAILABLE};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Location shown for hops inside the operator's own network
pub const LOCAL_NETWORK: &str = "local network";
/// ASN shown when every provider failed for a hop
pub const LOOKUP_FAILED: &str = "lookup failed";
/// ASN used for local hops when the operator's own ASN could not be found
pub const USER_ASN_LOOKUP_FAILED: &str = "user ASN lookup failed";

/// Populates hop ASN and location through a provider fallback chain
pub struct GeoAsnLookupService {
    providers: Vec<Arc<dyn GeoProvider>>,
    user_asn: Mutex<Option<String>>,
}

impl GeoAsnLookupService {
    /// ip-api.com first, then ipinfo.io
    pub fn new(http_timeout: Duration) -> Self {
        let providers = GeoApi::all()
            .iter()
            .map(|api| Arc::new(HttpGeoProvider::new(*api, http_timeout)) as Arc<dyn GeoProvider>)
            .collect();
        Self::with_providers(providers)
    }

    /// Use a custom provider chain
    pub fn with_providers(providers: Vec<Arc<dyn GeoProvider>>) -> Self {
        Self {
            providers,
            user_asn: Mutex::new(None),
        }
    }

    async fn first_success(&self, ip: Option<IpAddr>) -> Result<GeoInfo, GeoLookupError> {
        for provider in &self.providers {
            match provider.lookup(ip).await {
                Ok(info) => return Ok(info),
                Err(e) => debug!("{} lookup failed for {ip:?}: {e}", provider.name()),
            }
        }
        Err(GeoLookupError::AllProvidersFailed)
    }

    /// Find the operator's own ASN and remember it for local hops
    pub async fn detect_user_asn(&self) -> String {
        let asn = match self.first_success(None).await {
            Ok(info) => info.asn,
            Err(_) => USER_ASN_LOOKUP_FAILED.to_string(),
        };
        debug!("User ASN: {asn}");
        *self.user_asn.lock().expect("mutex poisoned") = Some(asn.clone());
        asn
    }

    /// The remembered user ASN, "N/A" before detection
    pub fn user_asn(&self) -> String {
        self.user_asn
            .lock()
            .expect("mutex poisoned")
            .clone()
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    /// Fill in the hop's ASN and location
    ///
    /// Hops without an address or with a non-public address get the user
    /// ASN and the local-network marker without any network call.
    pub async fn lookup(&self, hop: &SharedHop) {
        let (address, is_public) = {
            let state = hop.lock().expect("mutex poisoned");
            (state.address, state.network_class.is_public())
        };

        let address = match address {
            Some(addr) if is_public => addr,
            _ => {
                let user_asn = self.user_asn();
                let mut state = hop.lock().expect("mutex poisoned");
                state.asn_info = user_asn;
                state.location = LOCAL_NETWORK.to_string();
                return;
            }
        };

        let Some(_pending) = PendingFlag::try_raise(hop, PendingKind::GeoInfo) else {
            return;
        };
        let (asn, location) = match self.first_success(Some(address)).await {
            Ok(info) => (info.asn, info.location),
            Err(_) => (LOOKUP_FAILED.to_string(), NOT_AVAILABLE.to_string()),
        };
        let mut state = hop.lock().expect("mutex poisoned");
        state.asn_info = asn;
        state.location = location;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hop::{HopRegistry, HopState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        answer: Option<GeoInfo>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn new(answer: Option<(&str, &str)>) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.map(|(asn, location)| GeoInfo {
                    asn: asn.to_string(),
                    location: location.to_string(),
                }),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GeoProvider for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn lookup(&self, _ip: Option<IpAddr>) -> Result<GeoInfo, GeoLookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .clone()
                .ok_or(GeoLookupError::Unusable("canned failure".to_string()))
        }
    }

    fn hop(addr: &str) -> SharedHop {
        HopRegistry::new().insert(HopState::new(1, addr.parse().unwrap()))
    }

    #[tokio::test]
    async fn test_private_hop_makes_no_call() {
        let primary = Canned::new(Some(("AS1 Home ISP", "Town, Land")));
        let service = GeoAsnLookupService::with_providers(vec![primary.clone() as Arc<dyn GeoProvider>]);
        service.detect_user_asn().await;
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

        let h = hop("192.168.0.1");
        service.lookup(&h).await;
        let state = h.lock().unwrap().clone();
        assert_eq!(state.asn_info, "AS1 Home ISP");
        assert_eq!(state.location, LOCAL_NETWORK);
        assert!(!state.is_fetching_geo_info);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_to_secondary() {
        let primary = Canned::new(None);
        let secondary = Canned::new(Some(("AS15169 Google LLC", "US")));
        let service = GeoAsnLookupService::with_providers(vec![
            primary.clone() as Arc<dyn GeoProvider>,
            secondary.clone(),
        ]);

        let h = hop("8.8.8.8");
        service.lookup(&h).await;
        let state = h.lock().unwrap().clone();
        assert_eq!(state.asn_info, "AS15169 Google LLC");
        assert_eq!(state.location, "US");
        assert!(!state.is_fetching_geo_info);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_total_failure_markers() {
        let service = GeoAsnLookupService::with_providers(vec![
            Canned::new(None) as Arc<dyn GeoProvider>,
            Canned::new(None),
        ]);
        assert_eq!(service.detect_user_asn().await, USER_ASN_LOOKUP_FAILED);

        let h = hop("1.1.1.1");
        service.lookup(&h).await;
        let state = h.lock().unwrap().clone();
        assert_eq!(state.asn_info, LOOKUP_FAILED);
        assert_eq!(state.location, "N/A");
        assert!(!state.is_fetching_geo_info);
    }

    #[tokio::test]
    async fn test_user_asn_before_detection() {
        let service = GeoAsnLookupService::with_providers(vec![]);
        assert_eq!(service.user_asn(), "N/A");
    }
}
