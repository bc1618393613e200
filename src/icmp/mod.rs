//! ICMP echo transport
//!
//! A transport sends one echo request and reports what came back. Every
//! component of a session talks to the network through [`IcmpTransport`],
//! so tests can swap in a scripted implementation.

#[cfg(target_os = "linux")]
mod errqueue;
pub mod packet;
pub mod socket;

use crate::error::TransportError;
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

pub use socket::SystemIcmpTransport;

/// A single echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Address to send the echo to
    pub target: IpAddr,
    /// Hop limit (TTL); `None` uses the system default
    pub hop_limit: Option<u8>,
    /// Echo payload size in bytes
    pub payload_size: usize,
    /// How long to wait for a reply
    pub timeout: Duration,
}

impl ProbeRequest {
    /// Echo request with the system hop limit
    pub fn echo(target: IpAddr, payload_size: usize, timeout: Duration) -> Self {
        Self {
            target,
            hop_limit: None,
            payload_size,
            timeout,
        }
    }

    /// Hop-limited echo request used during discovery
    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = Some(hop_limit);
        self
    }
}

/// What a single echo request produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The target answered
    EchoReply {
        /// Replying address
        from: IpAddr,
        /// Round-trip time
        rtt: Duration,
    },
    /// A router along the path reported the hop limit exhausted
    TimeExceeded {
        /// Router address
        from: IpAddr,
        /// Round-trip time
        rtt: Duration,
    },
    /// Destination unreachable was reported
    Unreachable {
        /// Reporting address
        from: IpAddr,
        /// ICMP code
        code: u8,
    },
    /// Nothing arrived before the timeout
    TimedOut,
}

impl ProbeOutcome {
    /// Address of the replying device for echo and hop-limit replies
    pub fn responder(&self) -> Option<IpAddr> {
        match self {
            ProbeOutcome::EchoReply { from, .. } | ProbeOutcome::TimeExceeded { from, .. } => {
                Some(*from)
            }
            ProbeOutcome::Unreachable { .. } | ProbeOutcome::TimedOut => None,
        }
    }

    /// Whether the target itself answered
    pub fn is_echo_reply(&self) -> bool {
        matches!(self, ProbeOutcome::EchoReply { .. })
    }
}

/// Success flag and RTT of one monitoring probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// An echo reply arrived
    pub success: bool,
    /// Round-trip time in whole milliseconds, 0 when lost
    pub rtt_ms: u32,
}

impl ProbeResult {
    /// Successful probe
    pub fn success(rtt_ms: u32) -> Self {
        Self {
            success: true,
            rtt_ms,
        }
    }

    /// Lost probe
    pub fn loss() -> Self {
        Self {
            success: false,
            rtt_ms: 0,
        }
    }
}

impl From<ProbeOutcome> for ProbeResult {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::EchoReply { rtt, .. } => ProbeResult::success(duration_to_ms(rtt)),
            _ => ProbeResult::loss(),
        }
    }
}

/// Whole milliseconds, saturating
pub fn duration_to_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Sends single ICMP echo requests
#[async_trait]
pub trait IcmpTransport: Send + Sync {
    /// Send one echo request and wait for its reply or timeout
    ///
    /// Timeouts and unreachable replies are returned as outcomes. An error
    /// means the transport itself is unusable.
    async fn probe(&self, request: ProbeRequest) -> Result<ProbeOutcome, TransportError>;
}
