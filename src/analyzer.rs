//! PathPing-style per-hop loss analysis
//!
//! Sends a fixed batch of echoes to each hop in turn and builds a text
//! report. The analyzer keeps its own samples and never touches the
//! monitoring counters on [`HopState`].

use crate::events::{EventSink, SessionEvent};
use crate::hop::{HopState, SharedHop};
use crate::icmp::{duration_to_ms, IcmpTransport, ProbeOutcome, ProbeRequest};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-hop result of a path analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopSummary {
    /// Lost packets
    pub lost: u32,
    /// Packets sent (the per-hop batch size)
    pub sent: u32,
    /// Integer mean RTT of the answered packets, 0 when none answered
    pub avg_rtt_ms: u64,
}

impl HopSummary {
    /// Summarize one hop's samples, `None` entries being losses
    pub fn from_samples(samples: &[Option<u32>], sent: u32) -> Self {
        let answered: Vec<u64> = samples.iter().flatten().map(|&r| u64::from(r)).collect();
        let lost = u32::try_from(samples.len() - answered.len()).unwrap_or(u32::MAX);
        let avg_rtt_ms = if answered.is_empty() {
            0
        } else {
            answered.iter().sum::<u64>() / answered.len() as u64
        };
        Self {
            lost,
            sent,
            avg_rtt_ms,
        }
    }

    /// Truncated loss percentage
    pub fn loss_percent(&self) -> u32 {
        if self.sent == 0 {
            return 0;
        }
        self.lost * 100 / self.sent
    }

    /// `lost/sent = pct%`
    pub fn loss_text(&self) -> String {
        format!("{}/{} = {}%", self.lost, self.sent, self.loss_percent())
    }
}

/// Runs the one-shot path analysis
pub struct PathQualityAnalyzer {
    transport: Arc<dyn IcmpTransport>,
    probe_timeout: Duration,
    resolve_names: bool,
    events: EventSink,
}

impl PathQualityAnalyzer {
    /// Create an analyzer; `resolve_names` selects hostnames over addresses in the report
    pub fn new(transport: Arc<dyn IcmpTransport>, probe_timeout: Duration, resolve_names: bool) -> Self {
        Self {
            transport,
            probe_timeout,
            resolve_names,
            events: EventSink::none(),
        }
    }

    /// Publish progress as events
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn progress(&self, report: &str) {
        self.events
            .emit(SessionEvent::PathReportUpdated(report.to_string()));
    }

    /// Analyze every hop with `packets_per_hop` echoes each
    ///
    /// `target` labels the report header. A cancelled analysis returns the
    /// report built so far.
    pub async fn analyze(
        &self,
        target: &str,
        hops: &[SharedHop],
        packets_per_hop: u32,
        cancel: &CancellationToken,
    ) -> String {
        let snapshot = lock_all(hops);
        let mut report = self.header(target, &snapshot);
        let _ = write!(report, "\nComputing statistics for {} hops:\n", snapshot.len());
        self.progress(&report);
        self.events.status(format!("Analyzing route to {target}..."));

        let mut samples: Vec<Vec<Option<u32>>> = Vec::with_capacity(snapshot.len());
        for (index, hop) in snapshot.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Path analysis cancelled at hop {}", index + 1);
                return report;
            }
            self.events.status(format!(
                "Path analysis: probing hop {}/{} ({})...",
                index + 1,
                snapshot.len(),
                hop.address_text()
            ));

            let Some(hop_samples) = self.probe_hop(hop, packets_per_hop, cancel).await else {
                info!("Path analysis cancelled during hop {}", index + 1);
                return report;
            };
            samples.push(hop_samples);
            report.push('.');
            self.progress(&report);
        }

        // Hostnames may have resolved while probing
        let snapshot = lock_all(hops);
        report.push_str("\n\nRoute statistics from source to node:\n");
        report.push_str("Hop  RTT    Lost/Sent = Pct        Address\n");
        for (index, (hop, hop_samples)) in snapshot.iter().zip(&samples).enumerate() {
            let summary = HopSummary::from_samples(hop_samples, packets_per_hop);
            let _ = writeln!(
                report,
                "{:>3}   {:>3}ms  {:<21} {}",
                index + 1,
                summary.avg_rtt_ms,
                summary.loss_text(),
                hop.display_name(self.resolve_names)
            );
        }
        report.push_str("\nAnalysis complete.\n");

        self.events
            .emit(SessionEvent::PathAnalysisComplete(report.clone()));
        self.events.status("Path analysis complete");
        report
    }

    fn header(&self, target: &str, hops: &[HopState]) -> String {
        let last = hops
            .last()
            .map(HopState::address_text)
            .unwrap_or_else(|| crate::hop::NOT_AVAILABLE.to_string());
        let mut header = format!(
            "Tracing route to {target} [{last}]\nover a maximum of {} hops:\n\n",
            hops.len()
        );
        for hop in hops {
            let name = if self.resolve_names && !hop.hostname.is_empty() {
                hop.hostname.clone()
            } else {
                hop.address_text()
            };
            let _ = writeln!(header, "{:>3}  {name}", hop.hop_number);
        }
        header
    }

    /// `None` when cancelled mid-batch
    async fn probe_hop(
        &self,
        hop: &HopState,
        packets: u32,
        cancel: &CancellationToken,
    ) -> Option<Vec<Option<u32>>> {
        let Some(address) = hop.address else {
            return Some(vec![None; packets as usize]);
        };

        let mut samples = Vec::with_capacity(packets as usize);
        for _ in 0..packets {
            if cancel.is_cancelled() {
                return None;
            }
            let request = ProbeRequest::echo(address, crate::config::DEFAULT_PACKET_SIZE, self.probe_timeout);
            let sample = match self.transport.probe(request).await {
                Ok(ProbeOutcome::EchoReply { rtt, .. }) => Some(duration_to_ms(rtt)),
                Ok(_) => None,
                Err(e) => {
                    debug!("Analysis probe to {address} failed: {e}");
                    None
                }
            };
            samples.push(sample);
        }
        Some(samples)
    }
}

fn lock_all(hops: &[SharedHop]) -> Vec<HopState> {
    hops.iter()
        .map(|hop| hop.lock().expect("mutex poisoned").clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::hop::HopRegistry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Drops every `n`th probe per address
    struct LossyTransport {
        every: HashMap<IpAddr, usize>,
        counts: std::sync::Mutex<HashMap<IpAddr, usize>>,
        total: AtomicUsize,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl LossyTransport {
        fn new(every: &[(&str, usize)]) -> Self {
            Self {
                every: every.iter().map(|(a, n)| (a.parse().unwrap(), *n)).collect(),
                counts: Default::default(),
                total: AtomicUsize::new(0),
                cancel_after: None,
            }
        }
    }

    #[async_trait]
    impl IcmpTransport for LossyTransport {
        async fn probe(&self, request: ProbeRequest) -> Result<ProbeOutcome, TransportError> {
            let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, token)) = &self.cancel_after {
                if total >= *limit {
                    token.cancel();
                }
            }
            let mut counts = self.counts.lock().unwrap();
            let count = counts.entry(request.target).or_default();
            *count += 1;
            let every = self.every.get(&request.target).copied().unwrap_or(0);
            if every != 0 && *count % every == 0 {
                return Ok(ProbeOutcome::TimedOut);
            }
            Ok(ProbeOutcome::EchoReply {
                from: request.target,
                rtt: Duration::from_millis(12),
            })
        }
    }

    #[test]
    fn test_loss_percentages_truncate() {
        let cases = [(0, "0/50 = 0%"), (50, "50/50 = 100%"), (5, "5/50 = 10%"), (1, "1/50 = 2%")];
        for (lost, expected) in cases {
            let mut samples = vec![Some(10); 50 - lost];
            samples.extend(vec![None; lost]);
            let summary = HopSummary::from_samples(&samples, 50);
            assert_eq!(summary.loss_text(), expected);
        }

        let odd = HopSummary { lost: 1, sent: 3, avg_rtt_ms: 0 };
        assert_eq!(odd.loss_percent(), 33);
    }

    #[test]
    fn test_average_ignores_losses() {
        let summary = HopSummary::from_samples(&[Some(10), None, Some(15), Some(20)], 4);
        assert_eq!(summary.avg_rtt_ms, 15);
        assert_eq!(summary.lost, 1);

        let silent = HopSummary::from_samples(&[None, None], 2);
        assert_eq!(silent.avg_rtt_ms, 0);
        assert_eq!(silent.loss_percent(), 100);
    }

    fn path(registry: &HopRegistry) -> Vec<SharedHop> {
        let mut first = HopState::new(1, "192.168.1.1".parse().unwrap());
        first.hostname = "router.lan".to_string();
        vec![
            registry.insert(first),
            registry.insert(HopState::no_response(2)),
            registry.insert(HopState::new(3, "203.0.113.5".parse().unwrap())),
        ]
    }

    #[tokio::test]
    async fn test_full_report() {
        let registry = HopRegistry::new();
        let hops = path(&registry);
        let transport = Arc::new(LossyTransport::new(&[("203.0.113.5", 10)]));
        let analyzer = PathQualityAnalyzer::new(transport.clone(), Duration::from_millis(10), true);

        let report = analyzer
            .analyze("example.net", &hops, 50, &CancellationToken::new())
            .await;

        assert!(report.starts_with("Tracing route to example.net [203.0.113.5]\nover a maximum of 3 hops:\n\n"));
        assert!(report.contains("  1  router.lan\n  2  no response from host\n  3  203.0.113.5\n"));
        assert!(report.contains("Computing statistics for 3 hops:\n...\n"));
        assert!(report.contains("Hop  RTT    Lost/Sent = Pct        Address\n"));
        assert!(report.contains("  1    12ms  0/50 = 0%             router.lan [192.168.1.1]\n"));
        assert!(report.contains("  2     0ms  50/50 = 100%          no response from host [*]\n"));
        assert!(report.contains("  3    12ms  5/50 = 10%            203.0.113.5\n"));
        assert!(report.ends_with("\nAnalysis complete.\n"));

        // The silent hop is never probed
        assert_eq!(transport.total.load(Ordering::SeqCst), 100);
        // Monitoring counters are untouched
        assert_eq!(hops[0].lock().unwrap().total_probes_sent, 0);
    }

    #[tokio::test]
    async fn test_names_disabled() {
        let registry = HopRegistry::new();
        let hops = path(&registry);
        let transport = Arc::new(LossyTransport::new(&[]));
        let report = PathQualityAnalyzer::new(transport, Duration::from_millis(10), false)
            .analyze("example.net", &hops, 2, &CancellationToken::new())
            .await;

        assert!(report.contains("  1  192.168.1.1\n"));
        assert!(report.contains("  1    12ms  0/2 = 0%              192.168.1.1\n"));
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_report() {
        let registry = HopRegistry::new();
        let hops = path(&registry);
        let cancel = CancellationToken::new();
        let mut transport = LossyTransport::new(&[]);
        transport.cancel_after = Some((55, cancel.clone()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let report = PathQualityAnalyzer::new(Arc::new(transport), Duration::from_millis(10), true)
            .with_events(EventSink::new(tx))
            .analyze("example.net", &hops, 50, &cancel)
            .await;

        assert!(report.ends_with("Computing statistics for 3 hops:\n.."));
        assert!(!report.contains("Analysis complete."));

        let mut updates = 0;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SessionEvent::PathReportUpdated(_) => updates += 1,
                SessionEvent::PathAnalysisComplete(_) => completed = true,
                _ => {}
            }
        }
        assert_eq!(updates, 3);
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_empty_hop_set() {
        let transport = Arc::new(LossyTransport::new(&[]));
        let report = PathQualityAnalyzer::new(transport, Duration::from_millis(10), true)
            .analyze("example.net", &[], 50, &CancellationToken::new())
            .await;
        assert!(report.starts_with("Tracing route to example.net [N/A]"));
        assert!(report.ends_with("Analysis complete.\n"));
    }
}
