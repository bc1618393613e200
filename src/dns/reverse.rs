//! Reverse DNS lookup functionality

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;

/// Error type for reverse DNS operations
#[derive(Debug, thiserror::Error)]
pub enum ReverseDnsError {
    /// DNS resolution failed
    #[error("DNS resolution failed: {0}")]
    ResolutionError(String),

    /// No PTR record found
    #[error("No PTR record found")]
    NotFound,
}

/// Something that can answer PTR queries
#[async_trait]
pub trait PtrLookup: Send + Sync {
    /// Hostname for `ip`, without a trailing dot
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<String, ReverseDnsError>;
}

#[async_trait]
impl PtrLookup for TokioResolver {
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<String, ReverseDnsError> {
        let lookup = self
            .reverse_lookup(ip)
            .await
            .map_err(|e| ReverseDnsError::ResolutionError(e.to_string()))?;

        lookup
            .iter()
            .next()
            .map(|name| strip_root(&name.to_string()))
            .filter(|name| !name.is_empty())
            .ok_or(ReverseDnsError::NotFound)
    }
}

/// Remove the trailing root dot of a fully qualified name
pub fn strip_root(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::servers::create_default_resolver;
    use std::net::Ipv4Addr;

    #[test]
    fn test_strip_root() {
        assert_eq!(strip_root("dns.google."), "dns.google");
        assert_eq!(strip_root("dns.google"), "dns.google");
        assert_eq!(strip_root("."), "");
    }

    #[tokio::test]
    async fn test_reverse_dns_private_ip() {
        let resolver = create_default_resolver();
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        // Private IPs typically don't have PTR records on public DNS
        if let Err(e) = resolver.lookup_ptr(ip).await {
            assert!(
                matches!(e, ReverseDnsError::ResolutionError(_))
                    || matches!(e, ReverseDnsError::NotFound)
            );
        }
    }
}
