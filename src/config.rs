//! Configuration types for an analysis session
//!
//! Defaults are compile-time constants; a [`SessionConfig`] built through
//! [`SessionConfigBuilder`] overrides them per session.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Probes per hop that are excluded from statistics while a hop warms up
pub const WARMUP_PING_COUNT: u32 = 10;
/// Number of recent RTT samples kept per hop
pub const RECENT_RTT_CAPACITY: usize = 50;
/// Consecutive identical/absent replies after which discovery stops
pub const STALL_THRESHOLD: u32 = 5;
/// Default hop-limit ceiling for route discovery
pub const DEFAULT_MAX_HOPS: u8 = 40;
/// Default number of echoes sent to each hop by the path analyzer
pub const PATH_ANALYSIS_PACKET_COUNT: u32 = 50;

/// Default monitoring interval in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 500;
/// Default ICMP payload size in bytes
pub const DEFAULT_PACKET_SIZE: usize = 32;
/// Default discovery probe timeout in milliseconds
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 2000;
/// Default monitor probe timeout in milliseconds
pub const DEFAULT_MONITOR_TIMEOUT_MS: u64 = 2000;
/// Default path analysis probe timeout in milliseconds
pub const DEFAULT_ANALYSIS_TIMEOUT_MS: u64 = 1000;
/// Default refresh period for presentation snapshots in milliseconds
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 500;
/// Default timeout for geolocation HTTP requests in milliseconds
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5000;

const MIN_INTERVAL_MS: u128 = 100;
const MAX_INTERVAL_MS: u128 = 10_000;
const MAX_PACKET_SIZE: usize = 65_500;

/// DNS server used for explicit lookups
///
/// `System` uses the platform's configured name servers; the others are
/// fixed public resolver pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DnsServer {
    /// Platform resolver configuration
    #[default]
    System,
    /// Google Public DNS (8.8.8.8, 8.8.4.4)
    Google,
    /// Cloudflare (1.1.1.1, 1.0.0.1)
    Cloudflare,
    /// OpenDNS (208.67.222.222, 208.67.220.220)
    #[value(name = "opendns")]
    OpenDns,
}

impl DnsServer {
    /// Name server addresses for this choice, empty for `System`
    pub fn addresses(&self) -> Vec<IpAddr> {
        let pair: &[[u8; 4]] = match self {
            DnsServer::System => &[],
            DnsServer::Google => &[[8, 8, 8, 8], [8, 8, 4, 4]],
            DnsServer::Cloudflare => &[[1, 1, 1, 1], [1, 0, 0, 1]],
            DnsServer::OpenDns => &[[208, 67, 222, 222], [208, 67, 220, 220]],
        };
        pair.iter()
            .map(|o| IpAddr::V4(Ipv4Addr::from(*o)))
            .collect()
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            DnsServer::System => "System default",
            DnsServer::Google => "Google (8.8.8.8)",
            DnsServer::Cloudflare => "Cloudflare (1.1.1.1)",
            DnsServer::OpenDns => "OpenDNS (208.67.222.222)",
        }
    }
}

/// Address family preference for forward resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IpPreference {
    /// Pick an IPv4 address when one exists
    #[default]
    PreferIpv4,
    /// Pick an IPv6 address when one exists
    PreferIpv6,
}

impl IpPreference {
    /// Whether IPv6 addresses win
    pub fn prefers_ipv6(&self) -> bool {
        matches!(self, IpPreference::PreferIpv6)
    }
}

/// Per-probe and refresh timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Timeout for each hop-limited discovery probe
    pub discovery_timeout: Duration,
    /// Timeout for each monitoring probe
    pub monitor_timeout: Duration,
    /// Timeout for each path analysis probe
    pub analysis_timeout: Duration,
    /// Period at which presentation layers should take snapshots
    pub refresh_interval: Duration,
    /// Timeout for geolocation/ASN HTTP requests
    pub http_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_millis(DEFAULT_DISCOVERY_TIMEOUT_MS),
            monitor_timeout: Duration::from_millis(DEFAULT_MONITOR_TIMEOUT_MS),
            analysis_timeout: Duration::from_millis(DEFAULT_ANALYSIS_TIMEOUT_MS),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
        }
    }
}

/// Configuration for one analysis session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Highest hop limit tried during discovery (default: 40)
    pub max_hops: u8,
    /// Pause between monitoring cycles (default: 500ms)
    pub interval: Duration,
    /// ICMP payload size for monitoring probes (default: 32)
    pub packet_size: usize,
    /// Echoes per hop sent by the path analyzer (default: 50)
    pub packets_per_hop: u32,
    /// Enable reverse DNS for discovered hops (default: true)
    pub resolve_names: bool,
    /// Resolver used for explicit DNS queries
    pub dns_server: DnsServer,
    /// Address family preference for the target
    pub ip_preference: IpPreference,
    /// Probe and refresh timing
    pub timing: TimingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            packet_size: DEFAULT_PACKET_SIZE,
            packets_per_hop: PATH_ANALYSIS_PACKET_COUNT,
            resolve_names: true,
            dns_server: DnsServer::default(),
            ip_preference: IpPreference::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Create a new SessionConfig builder
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_hops < 1 {
            return Err("max_hops must be at least 1".to_string());
        }
        let interval_ms = self.interval.as_millis();
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval_ms) {
            return Err(format!(
                "interval must be between {MIN_INTERVAL_MS} and {MAX_INTERVAL_MS} ms"
            ));
        }
        if self.packet_size < 1 || self.packet_size > MAX_PACKET_SIZE {
            return Err(format!(
                "packet_size must be between 1 and {MAX_PACKET_SIZE} bytes"
            ));
        }
        if self.packets_per_hop < 1 {
            return Err("packets_per_hop must be at least 1".to_string());
        }
        let timeouts = [
            self.timing.discovery_timeout,
            self.timing.monitor_timeout,
            self.timing.analysis_timeout,
        ];
        if timeouts.iter().any(Duration::is_zero) {
            return Err("probe timeouts must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Builder for SessionConfig
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    /// Set the discovery hop-limit ceiling
    pub fn max_hops(mut self, hops: u8) -> Self {
        self.config.max_hops = hops;
        self
    }

    /// Set the monitoring interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the monitoring payload size
    pub fn packet_size(mut self, size: usize) -> Self {
        self.config.packet_size = size;
        self
    }

    /// Set the number of echoes per hop for path analysis
    pub fn packets_per_hop(mut self, count: u32) -> Self {
        self.config.packets_per_hop = count;
        self
    }

    /// Enable or disable reverse DNS
    pub fn resolve_names(mut self, enable: bool) -> Self {
        self.config.resolve_names = enable;
        self
    }

    /// Select the DNS server for explicit queries
    pub fn dns_server(mut self, server: DnsServer) -> Self {
        self.config.dns_server = server;
        self
    }

    /// Set the address family preference
    pub fn ip_preference(mut self, preference: IpPreference) -> Self {
        self.config.ip_preference = preference;
        self
    }

    /// Replace the timing configuration
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<SessionConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
