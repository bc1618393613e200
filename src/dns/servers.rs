//! Resolver construction for the selectable DNS servers

use crate::config::DnsServer;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use tracing::warn;

const DNS_PORT: u16 = 53;

/// Build a resolver for the chosen server
///
/// `System` reads the platform configuration and falls back to Cloudflare
/// when it cannot be read.
pub fn build_resolver(server: DnsServer) -> TokioResolver {
    match server {
        DnsServer::System => match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!("Failed to read system DNS configuration ({e}), using Cloudflare");
                create_default_resolver()
            }
        },
        other => {
            let group =
                NameServerConfigGroup::from_ips_clear(&other.addresses(), DNS_PORT, true);
            TokioResolver::builder_with_config(
                ResolverConfig::from_parts(None, vec![], group),
                TokioConnectionProvider::default(),
            )
            .build()
        }
    }
}

/// Create a default DNS resolver
pub fn create_default_resolver() -> TokioResolver {
    TokioResolver::builder_with_config(
        ResolverConfig::cloudflare(),
        TokioConnectionProvider::default(),
    )
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_every_server() {
        for server in [
            DnsServer::System,
            DnsServer::Google,
            DnsServer::Cloudflare,
            DnsServer::OpenDns,
        ] {
            let _resolver = build_resolver(server);
        }
    }
}
