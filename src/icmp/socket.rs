//! ICMP echo over system sockets
//!
//! Each probe opens its own socket so that hop limits never leak between
//! concurrent probes. Raw sockets are tried first; unprivileged datagram
//! ICMP sockets are the fallback.
//!
//! On Linux, datagram ICMP sockets deliver hop-limit errors only through the
//! socket error queue, so that queue is enabled and polled alongside the
//! normal receive path.

use super::packet::{
    build_echo_request_v4, build_echo_request_v6, parse_reply_v4, parse_reply_v6, ReplyKind,
};
use super::{IcmpTransport, ProbeOutcome, ProbeRequest};
use crate::error::TransportError;
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// Common POSIX error codes
const EPERM: i32 = 1; // Operation not permitted
const EACCES: i32 = 13; // Permission denied

const RECV_BUFFER_LEN: usize = 65_536;

/// Longest blocking read between error-queue checks
#[cfg(target_os = "linux")]
const ERRQUEUE_POLL: Duration = Duration::from_millis(10);

/// How the probe socket was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    /// Raw ICMP socket (requires privileges)
    Raw,
    /// Unprivileged datagram ICMP socket
    Dgram,
}

impl SocketMode {
    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            SocketMode::Raw => "Raw ICMP",
            SocketMode::Dgram => "Datagram ICMP",
        }
    }
}

/// [`IcmpTransport`] backed by operating-system ICMP sockets
pub struct SystemIcmpTransport {
    identifier: u16,
    sequence: AtomicU16,
    mode_logged: AtomicBool,
}

impl SystemIcmpTransport {
    /// Create a transport with a random echo identifier
    pub fn new() -> Self {
        Self {
            identifier: rand::random::<u16>(),
            sequence: AtomicU16::new(rand::random::<u16>()),
            mode_logged: AtomicBool::new(false),
        }
    }

    /// Echo identifier placed in every request
    pub fn identifier(&self) -> u16 {
        self.identifier
    }
}

impl Default for SystemIcmpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IcmpTransport for SystemIcmpTransport {
    async fn probe(&self, request: ProbeRequest) -> Result<ProbeOutcome, TransportError> {
        let (socket, mode) = open_socket(request.target)?;
        if !self.mode_logged.swap(true, Ordering::Relaxed) {
            info!("Using {} mode for probes", mode.description());
        }

        let identifier = self.identifier;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || {
            probe_blocking(&socket, mode, request, identifier, sequence)
        })
        .await
        .map_err(|e| TransportError::Socket(format!("probe task failed: {e}")))?
    }
}

fn is_permission_error(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::PermissionDenied
        || matches!(err.raw_os_error(), Some(EPERM) | Some(EACCES))
}

fn open_socket(target: IpAddr) -> Result<(Socket, SocketMode), TransportError> {
    let (domain, protocol) = match target {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let raw_err = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => return Ok((socket, SocketMode::Raw)),
        Err(e) => e,
    };
    debug!("Raw ICMP socket unavailable ({raw_err}), trying datagram ICMP");

    match Socket::new(domain, Type::DGRAM, Some(protocol)) {
        Ok(socket) => {
            let bind_addr: SocketAddr = match target {
                IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
                IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            };
            socket
                .bind(&bind_addr.into())
                .map_err(|e| TransportError::Socket(format!("bind failed: {e}")))?;
            #[cfg(target_os = "linux")]
            super::errqueue::enable(&socket, target).map_err(|e| {
                TransportError::Socket(format!("Failed to enable ICMP error queue: {e}"))
            })?;
            Ok((socket, SocketMode::Dgram))
        }
        Err(e) if is_permission_error(&e) || is_permission_error(&raw_err) => {
            Err(TransportError::InsufficientPermissions {
                required: "root or CAP_NET_RAW for raw ICMP sockets".to_string(),
                suggestion: "Run with sudo, grant CAP_NET_RAW, or allow unprivileged ping via net.ipv4.ping_group_range".to_string(),
            })
        }
        Err(e) => Err(TransportError::Socket(e.to_string())),
    }
}

fn probe_blocking(
    socket: &Socket,
    mode: SocketMode,
    request: ProbeRequest,
    identifier: u16,
    sequence: u16,
) -> Result<ProbeOutcome, TransportError> {
    let packet = match request.target {
        IpAddr::V4(_) => build_echo_request_v4(identifier, sequence, request.payload_size)?,
        IpAddr::V6(_) => build_echo_request_v6(identifier, sequence, request.payload_size)?,
    };

    if let Some(hop_limit) = request.hop_limit {
        let result = match request.target {
            IpAddr::V4(_) => socket.set_ttl_v4(u32::from(hop_limit)),
            IpAddr::V6(_) => socket.set_unicast_hops_v6(u32::from(hop_limit)),
        };
        result.map_err(|e| TransportError::Socket(format!("Failed to set hop limit: {e}")))?;
    }

    let target = SockAddr::from(SocketAddr::new(request.target, 0));
    let sent_at = Instant::now();
    socket
        .send_to(&packet, &target)
        .map_err(|e| TransportError::Send(e.to_string()))?;

    // The kernel rewrites the identifier of datagram ICMP sockets
    let expected_id = match mode {
        SocketMode::Raw => Some(identifier),
        SocketMode::Dgram => None,
    };
    receive_reply(socket, mode, request, expected_id, sequence, sent_at)
}

/// Whether ICMP errors arrive on the error queue instead of `recv_from`
fn uses_error_queue(mode: SocketMode) -> bool {
    cfg!(target_os = "linux") && mode == SocketMode::Dgram
}

fn to_outcome(kind: ReplyKind, from: IpAddr, rtt: Duration) -> ProbeOutcome {
    match kind {
        ReplyKind::EchoReply => ProbeOutcome::EchoReply { from, rtt },
        ReplyKind::TimeExceeded => ProbeOutcome::TimeExceeded { from, rtt },
        ReplyKind::Unreachable(code) => ProbeOutcome::Unreachable { from, code },
    }
}

fn receive_reply(
    socket: &Socket,
    mode: SocketMode,
    request: ProbeRequest,
    expected_id: Option<u16>,
    sequence: u16,
    sent_at: Instant,
) -> Result<ProbeOutcome, TransportError> {
    let mut buf = vec![MaybeUninit::<u8>::uninit(); RECV_BUFFER_LEN];
    let deadline = sent_at + request.timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(ProbeOutcome::TimedOut);
        }

        #[cfg(target_os = "linux")]
        let remaining = if uses_error_queue(mode) {
            if let Some((kind, from)) = super::errqueue::take_reply(socket, sequence) {
                return Ok(to_outcome(kind, from, sent_at.elapsed()));
            }
            remaining.min(ERRQUEUE_POLL)
        } else {
            remaining
        };

        socket
            .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        let (size, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                continue;
            }
            // A queued ICMP error is also reported once as a pending socket error
            Err(_) if uses_error_queue(mode) => continue,
            Err(e) => return Err(TransportError::Receive(e.to_string())),
        };
        let rtt = sent_at.elapsed();
        let Some(from) = from.as_socket().map(|s| s.ip()) else {
            continue;
        };

        // recv_from initialized the first `size` bytes
        let data: &[u8] =
            unsafe { &*(&buf[..size] as *const [MaybeUninit<u8>] as *const [u8]) };
        let parsed = match request.target {
            IpAddr::V4(_) => parse_reply_v4(data),
            IpAddr::V6(_) => parse_reply_v6(data),
        };
        let Some(reply) = parsed.filter(|r| r.answers(expected_id, sequence)) else {
            continue;
        };

        return Ok(to_outcome(reply.kind, from, rtt));
    }
}
