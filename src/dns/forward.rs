//! Forward resolution through an ordered chain of address providers

use crate::config::IpPreference;
use crate::error::ResolveError;
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// One way of turning a host name into an address
#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Resolve `host`, honoring the family preference
    async fn attempt(&self, host: &str, preference: IpPreference) -> Result<IpAddr, ResolveError>;
}

/// Pick an address of the preferred family, else the first of the other
pub fn pick_by_preference(addrs: &[IpAddr], preference: IpPreference) -> Option<IpAddr> {
    let wants_v6 = preference.prefers_ipv6();
    addrs
        .iter()
        .find(|a| a.is_ipv6() == wants_v6)
        .or_else(|| addrs.first())
        .copied()
}

/// The platform resolver (getaddrinfo)
pub struct SystemLookup;

#[async_trait]
impl AddressProvider for SystemLookup {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn attempt(&self, host: &str, preference: IpPreference) -> Result<IpAddr, ResolveError> {
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| ResolveError::Lookup(e.to_string()))?
            .map(|sa| sa.ip())
            .collect();
        pick_by_preference(&addrs, preference).ok_or(ResolveError::NoUsableAddress)
    }
}

/// Explicit A/AAAA queries against a configured resolver
pub struct ConfiguredLookup {
    resolver: Arc<TokioResolver>,
}

impl ConfiguredLookup {
    /// Query through `resolver`
    pub fn new(resolver: Arc<TokioResolver>) -> Self {
        Self { resolver }
    }

    async fn query(&self, host: &str, ipv6: bool) -> Option<IpAddr> {
        if ipv6 {
            match self.resolver.ipv6_lookup(host).await {
                Ok(lookup) => lookup.iter().next().map(|aaaa| IpAddr::V6(aaaa.0)),
                Err(e) => {
                    debug!("AAAA query for {host} failed: {e}");
                    None
                }
            }
        } else {
            match self.resolver.ipv4_lookup(host).await {
                Ok(lookup) => lookup.iter().next().map(|a| IpAddr::V4(a.0)),
                Err(e) => {
                    debug!("A query for {host} failed: {e}");
                    None
                }
            }
        }
    }
}

#[async_trait]
impl AddressProvider for ConfiguredLookup {
    fn name(&self) -> &'static str {
        "configured"
    }

    async fn attempt(&self, host: &str, preference: IpPreference) -> Result<IpAddr, ResolveError> {
        let preferred_v6 = preference.prefers_ipv6();
        for ipv6 in [preferred_v6, !preferred_v6] {
            if let Some(addr) = self.query(host, ipv6).await {
                return Ok(addr);
            }
        }
        Err(ResolveError::NoUsableAddress)
    }
}

/// Forward resolver trying each provider in order
pub struct ForwardResolver {
    providers: Vec<Box<dyn AddressProvider>>,
}

impl ForwardResolver {
    /// System resolver first, then the configured resolver
    pub fn new(resolver: Arc<TokioResolver>) -> Self {
        Self::with_providers(vec![
            Box::new(SystemLookup),
            Box::new(ConfiguredLookup::new(resolver)),
        ])
    }

    /// Use a custom provider chain
    pub fn with_providers(providers: Vec<Box<dyn AddressProvider>>) -> Self {
        Self { providers }
    }

    /// Resolve a host name or literal address
    ///
    /// A literal address is returned unchanged without consulting any provider.
    pub async fn resolve(&self, host: &str, preference: IpPreference) -> Result<IpAddr, ResolveError> {
        let host = host.trim();
        if let Ok(addr) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            return Ok(addr);
        }

        for provider in &self.providers {
            match provider.attempt(host, preference).await {
                Ok(addr) => {
                    debug!("Resolved {host} to {addr} via {} resolver", provider.name());
                    return Ok(addr);
                }
                Err(e) => debug!("{} resolver failed for {host}: {e}", provider.name()),
            }
        }
        Err(ResolveError::CouldNotResolve(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        answer: Option<IpAddr>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AddressProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn attempt(&self, _host: &str, _pref: IpPreference) -> Result<IpAddr, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.ok_or(ResolveError::NoUsableAddress)
        }
    }

    fn scripted(answer: Option<&str>, calls: &Arc<AtomicUsize>) -> Box<dyn AddressProvider> {
        Box::new(Scripted {
            answer: answer.map(|a| a.parse().unwrap()),
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn test_pick_by_preference() {
        let v4: IpAddr = "93.184.216.34".parse().unwrap();
        let v6: IpAddr = "2606:2800:220:1::1".parse().unwrap();

        assert_eq!(pick_by_preference(&[v6, v4], IpPreference::PreferIpv4), Some(v4));
        assert_eq!(pick_by_preference(&[v4, v6], IpPreference::PreferIpv6), Some(v6));
        assert_eq!(pick_by_preference(&[v6], IpPreference::PreferIpv4), Some(v6));
        assert_eq!(pick_by_preference(&[v4], IpPreference::PreferIpv6), Some(v4));
        assert_eq!(pick_by_preference(&[], IpPreference::PreferIpv4), None);
    }

    #[tokio::test]
    async fn test_literal_address_skips_providers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = ForwardResolver::with_providers(vec![scripted(Some("1.2.3.4"), &calls)]);

        let addr = resolver.resolve("8.8.8.8", IpPreference::PreferIpv4).await.unwrap();
        assert_eq!(addr, "8.8.8.8".parse::<IpAddr>().unwrap());
        let addr = resolver.resolve("[::1]", IpPreference::PreferIpv4).await.unwrap();
        assert_eq!(addr, "::1".parse::<IpAddr>().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = ForwardResolver::with_providers(vec![
            scripted(None, &calls),
            scripted(Some("10.0.0.9"), &calls),
        ]);

        let addr = resolver.resolve("example.test", IpPreference::PreferIpv4).await.unwrap();
        assert_eq!(addr, "10.0.0.9".parse::<IpAddr>().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver =
            ForwardResolver::with_providers(vec![scripted(None, &calls), scripted(None, &calls)]);

        let err = resolver
            .resolve("nowhere.invalid", IpPreference::PreferIpv4)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::CouldNotResolve(ref h) if h == "nowhere.invalid"));
        assert_eq!(err.to_string(), "could not resolve host: nowhere.invalid");
    }
}
