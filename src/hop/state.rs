//! Per-hop measurement record

use crate::config::{RECENT_RTT_CAPACITY, WARMUP_PING_COUNT};
use crate::hop::NetworkClass;
use crate::icmp::ProbeResult;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::IpAddr;

/// Address text shown for a hop that never replied
pub const NO_ADDRESS: &str = "*";
/// Hostname shown for a hop that never replied
pub const NO_RESPONSE_HOSTNAME: &str = "no response from host";
/// Placeholder for fields that do not apply
pub const NOT_AVAILABLE: &str = "N/A";

/// Live state of one hop along the path
///
/// RTTs are whole milliseconds. `None` in `last_rtt` or in `recent_rtts`
/// marks a lost probe.
#[derive(Debug, Clone, Serialize)]
pub struct HopState {
    /// Hop number (1-based)
    pub hop_number: u8,
    /// Replying address, absent when the hop never answered
    pub address: Option<IpAddr>,
    /// Reverse DNS name, or the address text when unresolved
    pub hostname: String,
    /// A reverse lookup is in flight
    pub is_resolving_hostname: bool,
    /// Probes counted after warm-up
    pub total_probes_sent: u32,
    /// Probes lost after warm-up
    pub probes_lost: u32,
    /// Most recent RTT, `None` after a loss
    pub last_rtt: Option<u32>,
    /// Lowest RTT seen
    pub best_rtt: Option<u32>,
    /// Highest RTT seen
    pub worst_rtt: u32,
    /// Sliding window of recent outcomes, oldest first
    pub recent_rtts: VecDeque<Option<u32>>,
    /// Population standard deviation of the successful entries in `recent_rtts`
    pub jitter: f64,
    /// Probes dispatched by the monitor, warm-up included
    pub warmup_probes_sent: u32,
    /// Classification of `address`
    pub network_class: NetworkClass,
    /// ASN and organization
    pub asn_info: String,
    /// "city, country" or a placeholder
    pub location: String,
    /// A geolocation lookup is in flight
    pub is_fetching_geo_info: bool,
}

impl HopState {
    /// Create a hop that replied from `address`
    pub fn new(hop_number: u8, address: IpAddr) -> Self {
        Self {
            hop_number,
            address: Some(address),
            hostname: String::new(),
            is_resolving_hostname: false,
            total_probes_sent: 0,
            probes_lost: 0,
            last_rtt: None,
            best_rtt: None,
            worst_rtt: 0,
            recent_rtts: VecDeque::with_capacity(RECENT_RTT_CAPACITY),
            jitter: 0.0,
            warmup_probes_sent: 0,
            network_class: NetworkClass::classify(Some(address)),
            asn_info: String::new(),
            location: String::new(),
            is_fetching_geo_info: false,
        }
    }

    /// Create a hop that did not answer its discovery probe
    pub fn no_response(hop_number: u8) -> Self {
        Self {
            address: None,
            hostname: NO_RESPONSE_HOSTNAME.to_string(),
            network_class: NetworkClass::Unknown,
            asn_info: NOT_AVAILABLE.to_string(),
            location: NOT_AVAILABLE.to_string(),
            ..Self::new(hop_number, IpAddr::from([0, 0, 0, 0]))
        }
    }

    /// Address as text, `*` when absent
    pub fn address_text(&self) -> String {
        self.address
            .map(|a| a.to_string())
            .unwrap_or_else(|| NO_ADDRESS.to_string())
    }

    /// Apply one monitoring probe result
    ///
    /// Returns true when this probe completed the warm-up window.
    pub fn record_probe(&mut self, result: ProbeResult) -> bool {
        self.warmup_probes_sent += 1;
        if self.warmup_probes_sent <= WARMUP_PING_COUNT {
            return self.warmup_probes_sent == WARMUP_PING_COUNT;
        }

        self.total_probes_sent += 1;
        if result.success {
            let rtt = result.rtt_ms;
            self.last_rtt = Some(rtt);
            self.push_recent(Some(rtt));
            if self.best_rtt.is_none_or(|best| rtt < best) {
                self.best_rtt = Some(rtt);
            }
            if rtt > self.worst_rtt {
                self.worst_rtt = rtt;
            }
            if self.recent_rtts.iter().flatten().count() > 1 {
                if let Some(jitter) = population_std_dev(&self.recent_rtts) {
                    self.jitter = jitter;
                }
            }
        } else {
            self.probes_lost += 1;
            self.last_rtt = None;
            self.push_recent(None);
        }
        false
    }

    fn push_recent(&mut self, sample: Option<u32>) {
        self.recent_rtts.push_back(sample);
        while self.recent_rtts.len() > RECENT_RTT_CAPACITY {
            self.recent_rtts.pop_front();
        }
    }

    /// Loss percentage over all counted probes
    pub fn loss_percent(&self) -> f64 {
        if self.total_probes_sent == 0 {
            return 0.0;
        }
        f64::from(self.probes_lost) * 100.0 / f64::from(self.total_probes_sent)
    }

    /// Mean of the successful entries in the recent window
    pub fn average_rtt(&self) -> Option<f64> {
        let samples: Vec<f64> = self
            .recent_rtts
            .iter()
            .flatten()
            .map(|&r| f64::from(r))
            .collect();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Name shown in reports: `host [ip]` when a distinct hostname is known
    pub fn display_name(&self, resolve_names: bool) -> String {
        let ip = self.address_text();
        if resolve_names && !self.hostname.is_empty() && self.hostname != ip {
            format!("{} [{}]", self.hostname, ip)
        } else {
            ip
        }
    }
}

/// Population standard deviation of the successful samples
///
/// `None` when there are no successful samples.
pub fn population_std_dev<'a, I>(samples: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a Option<u32>>,
{
    let values: Vec<f64> = samples
        .into_iter()
        .flatten()
        .map(|&v| f64::from(v))
        .collect();
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}
