//! Heuristic path health diagnosis
//!
//! [`evaluate`] is a pure function over a hop snapshot taken from the
//! registry. It is cheap and stateless, so callers re-run it on every
//! refresh.

use crate::hop::HopState;
use serde::Serialize;
use std::fmt;

/// Minimum counted probes before a hop is considered by the heuristics
const MIN_PROBES: u32 = 5;
/// First-hop loss above this is a local network problem
const FIRST_HOP_LOSS_PERCENT: f64 = 2.0;
/// First-hop best RTT above this is slow for a LAN
const FIRST_HOP_LATENCY_MS: u32 = 20;
/// Loss increase that marks a hop as a loss origin
const LOSS_STEP_PERCENT: f64 = 5.0;
/// Destination loss above the previous hop by more than this is server-side
const DESTINATION_EXCESS_PERCENT: f64 = 10.0;
const DEPRIORITIZED_LOSS_PERCENT: f64 = 80.0;
const DEPRIORITIZED_DESTINATION_MAX_PERCENT: f64 = 10.0;
const HEALTHY_DESTINATION_PERCENT: f64 = 2.0;

/// How serious a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    /// Informational
    Info,
    /// Likely degradation
    Warn,
    /// Confirmed fault
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One line of diagnosis output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Text shown to the user
    pub message: String,
    /// Severity of the rule that produced this line
    pub severity: Severity,
    /// Headline rather than explanatory note
    pub emphasize: bool,
}

impl Finding {
    fn headline(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            emphasize: true,
        }
    }

    fn note(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            emphasize: false,
        }
    }
}

/// Loss percentage, `None` before any probe was counted
fn loss(hop: &HopState) -> Option<f64> {
    (hop.total_probes_sent > 0).then(|| hop.loss_percent())
}

fn name(hop: &HopState, resolve_names: bool) -> String {
    if resolve_names && !hop.hostname.is_empty() {
        hop.hostname.clone()
    } else {
        hop.address_text()
    }
}

/// Diagnose a snapshot of hops ordered by hop number
///
/// Rules are applied in order and several may fire. When none does, a
/// single all-clear or still-analyzing finding is returned.
pub fn evaluate(hops: &[HopState], resolve_names: bool) -> Vec<Finding> {
    let mut findings = Vec::new();

    if hops.iter().all(|h| h.total_probes_sent == 0) {
        findings.push(Finding::note(
            Severity::Info,
            "Waiting for more data for an accurate analysis...",
        ));
        return findings;
    }

    let Some(last) = hops.iter().rev().find(|h| h.address.is_some()) else {
        return findings;
    };

    if let Some(first) = hops.first().filter(|h| h.total_probes_sent > MIN_PROBES) {
        if first.loss_percent() > FIRST_HOP_LOSS_PERCENT {
            findings.push(Finding::headline(
                Severity::Critical,
                "ALERT: Significant packet loss at the first hop (your router).",
            ));
            findings.push(Finding::note(
                Severity::Critical,
                "This points to a problem in your local network. Check your network cable, Wi-Fi connection or the router itself.",
            ));
        }
        if first.best_rtt.is_some_and(|best| best > FIRST_HOP_LATENCY_MS) {
            findings.push(Finding::headline(Severity::Warn, "WARNING: High latency to your router."));
            findings.push(Finding::note(
                Severity::Warn,
                "Local network traffic is slow. This can be caused by Wi-Fi interference or an overloaded router.",
            ));
        }
    }

    if let Some(origin) = loss_origin(hops, last) {
        findings.push(Finding::headline(
            Severity::Critical,
            format!(
                "ALERT: Packet loss appears to start at hop {} ({}).",
                origin.hop_number,
                name(origin, resolve_names)
            ),
        ));
        findings.push(Finding::note(
            Severity::Critical,
            format!(
                "This node belongs to '{}' and is probably in '{}'. The problem may be with this provider.",
                origin.asn_info, origin.location
            ),
        ));
    }

    let last_loss = loss(last);
    let before_last = hops
        .iter()
        .rev()
        .find(|h| u16::from(h.hop_number) + 1 == u16::from(last.hop_number))
        .and_then(loss);
    if let (Some(last_loss), Some(before_last)) = (last_loss, before_last) {
        if last_loss > before_last + DESTINATION_EXCESS_PERCENT {
            findings.push(Finding::headline(
                Severity::Warn,
                "WARNING: Packet loss occurs mainly at the final destination.",
            ));
            findings.push(Finding::note(
                Severity::Warn,
                format!(
                    "The server {} may be overloaded or configured to rate-limit the traffic we are sending.",
                    name(last, resolve_names)
                ),
            ));
        }
    }

    let deprioritizing = hops.iter().any(|h| {
        h.total_probes_sent > MIN_PROBES
            && h.hop_number != last.hop_number
            && h.loss_percent() > DEPRIORITIZED_LOSS_PERCENT
    });
    if deprioritizing && last_loss.is_some_and(|l| l < DEPRIORITIZED_DESTINATION_MAX_PERCENT) {
        findings.push(Finding::headline(
            Severity::Info,
            "INFO: Some intermediate hops show high packet loss.",
        ));
        findings.push(Finding::note(
            Severity::Info,
            "Since the loss does not reach the final destination, these routers are most likely deprioritizing pings (normal behavior).",
        ));
    }

    if findings.is_empty() {
        if last_loss.is_some_and(|l| l < HEALTHY_DESTINATION_PERCENT) {
            findings.push(Finding::headline(
                Severity::Info,
                "No significant issues detected on the route so far.",
            ));
        } else {
            findings.push(Finding::note(Severity::Info, "Analyzing..."));
        }
    }

    findings
}

/// First hop whose loss jumps and stays high downstream
fn loss_origin<'a>(hops: &'a [HopState], last: &HopState) -> Option<&'a HopState> {
    let mut previous_loss = 0.0;
    for hop in hops.iter().filter(|h| h.total_probes_sent > MIN_PROBES) {
        let current_loss = hop.loss_percent();
        if current_loss > previous_loss + LOSS_STEP_PERCENT && hop.hop_number != last.hop_number {
            let downstream: Vec<f64> = hops
                .iter()
                .filter(|h| h.hop_number > hop.hop_number)
                .filter_map(loss)
                .collect();
            if !downstream.is_empty() {
                let average = downstream.iter().sum::<f64>() / downstream.len() as f64;
                if average >= current_loss - LOSS_STEP_PERCENT {
                    return Some(hop);
                }
            }
        }
        previous_loss = current_loss;
    }
    None
}
