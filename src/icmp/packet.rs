//! ICMP echo packet construction and reply parsing

use crate::error::TransportError;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use pnet::util::checksum as pnet_checksum;

/// ICMP header length in bytes (type, code, checksum, id, sequence)
pub const ICMP_HEADER_LEN: usize = 8;
/// Fixed IPv6 header length in bytes
const IPV6_HEADER_LEN: usize = 40;
/// Largest echo payload that fits a single IPv4 datagram
pub const MAX_PAYLOAD_SIZE: usize = 65_507;

const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const IPPROTO_ICMPV6: u8 = 58;

/// Kind of ICMP message received in answer to an echo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Echo reply from the target
    EchoReply,
    /// Hop limit exhausted at a router
    TimeExceeded,
    /// Destination unreachable with its code
    Unreachable(u8),
}

/// A parsed reply, carrying the identifier and sequence of the echo it answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedReply {
    /// Message kind
    pub kind: ReplyKind,
    /// Identifier of the original echo request
    pub identifier: u16,
    /// Sequence number of the original echo request
    pub sequence: u16,
}

impl ParsedReply {
    /// Whether this reply answers the given echo
    ///
    /// With `identifier == None` only the sequence is compared; datagram
    /// sockets have their identifier rewritten by the kernel.
    pub fn answers(&self, identifier: Option<u16>, sequence: u16) -> bool {
        self.sequence == sequence && identifier.is_none_or(|id| id == self.identifier)
    }
}

fn fill_payload(payload: &mut [u8]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte = b'a' + (i % 23) as u8;
    }
}

/// Build an ICMPv4 echo request with a valid checksum
pub fn build_echo_request_v4(
    identifier: u16,
    sequence: u16,
    payload_size: usize,
) -> Result<Vec<u8>, TransportError> {
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(TransportError::PayloadTooLarge {
            size: payload_size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let mut buf = vec![0u8; MutableEchoRequestPacket::minimum_packet_size() + payload_size];
    let mut packet = MutableEchoRequestPacket::new(&mut buf)
        .ok_or_else(|| TransportError::Send("Failed to create ICMP packet".to_string()))?;

    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    let mut payload = vec![0u8; payload_size];
    fill_payload(&mut payload);
    packet.set_payload(&payload);

    let checksum = pnet_checksum(packet.packet(), 1);
    packet.set_checksum(checksum);
    Ok(buf)
}

/// Build an ICMPv6 echo request
///
/// The checksum is left zero; the kernel computes it over the pseudo-header.
pub fn build_echo_request_v6(
    identifier: u16,
    sequence: u16,
    payload_size: usize,
) -> Result<Vec<u8>, TransportError> {
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(TransportError::PayloadTooLarge {
            size: payload_size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let mut buf = vec![0u8; ICMP_HEADER_LEN + payload_size];
    buf[0] = ICMPV6_ECHO_REQUEST;
    buf[4..6].copy_from_slice(&identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&sequence.to_be_bytes());
    fill_payload(&mut buf[ICMP_HEADER_LEN..]);
    Ok(buf)
}

pub(crate) fn id_and_seq(icmp: &[u8]) -> Option<(u16, u16)> {
    if icmp.len() < ICMP_HEADER_LEN {
        return None;
    }
    Some((
        u16::from_be_bytes([icmp[4], icmp[5]]),
        u16::from_be_bytes([icmp[6], icmp[7]]),
    ))
}

/// Parse an ICMPv4 message, with or without its leading IPv4 header
///
/// Raw sockets (and datagram sockets on some platforms) deliver the IP
/// header; an ICMP type byte never has 4 in its high nibble, so the first
/// byte tells them apart.
pub fn parse_reply_v4(data: &[u8]) -> Option<ParsedReply> {
    let icmp_data = if data.first().map(|b| b >> 4) == Some(4) {
        let ip = Ipv4Packet::new(data)?;
        let header_len = usize::from(ip.get_header_length()) * 4;
        data.get(header_len..)?
    } else {
        data
    };
    let icmp = IcmpPacket::new(icmp_data)?;

    match icmp.get_icmp_type() {
        IcmpTypes::EchoReply => {
            let reply = EchoReplyPacket::new(icmp_data)?;
            Some(ParsedReply {
                kind: ReplyKind::EchoReply,
                identifier: reply.get_identifier(),
                sequence: reply.get_sequence_number(),
            })
        }
        kind @ (IcmpTypes::TimeExceeded | IcmpTypes::DestinationUnreachable) => {
            let inner = Ipv4Packet::new(icmp_data.get(ICMP_HEADER_LEN..)?)?;
            let inner_header_len = usize::from(inner.get_header_length()) * 4;
            let original = icmp_data.get(ICMP_HEADER_LEN + inner_header_len..)?;
            if original.first() != Some(&IcmpTypes::EchoRequest.0) {
                return None;
            }
            let (identifier, sequence) = id_and_seq(original)?;
            let kind = if kind == IcmpTypes::TimeExceeded {
                ReplyKind::TimeExceeded
            } else {
                ReplyKind::Unreachable(icmp.get_icmp_code().0)
            };
            Some(ParsedReply {
                kind,
                identifier,
                sequence,
            })
        }
        _ => None,
    }
}

/// Parse an ICMPv6 message (IPv6 sockets never deliver the IP header)
pub fn parse_reply_v6(data: &[u8]) -> Option<ParsedReply> {
    let msg_type = *data.first()?;
    let code = *data.get(1)?;
    match msg_type {
        ICMPV6_ECHO_REPLY => {
            let (identifier, sequence) = id_and_seq(data)?;
            Some(ParsedReply {
                kind: ReplyKind::EchoReply,
                identifier,
                sequence,
            })
        }
        ICMPV6_TIME_EXCEEDED | ICMPV6_DEST_UNREACHABLE => {
            let inner_ip = data.get(ICMP_HEADER_LEN..)?;
            if inner_ip.len() < IPV6_HEADER_LEN || inner_ip[6] != IPPROTO_ICMPV6 {
                return None;
            }
            let original = &inner_ip[IPV6_HEADER_LEN..];
            if original.first() != Some(&ICMPV6_ECHO_REQUEST) {
                return None;
            }
            let (identifier, sequence) = id_and_seq(original)?;
            let kind = if msg_type == ICMPV6_TIME_EXCEEDED {
                ReplyKind::TimeExceeded
            } else {
                ReplyKind::Unreachable(code)
            };
            Some(ParsedReply {
                kind,
                identifier,
                sequence,
            })
        }
        _ => None,
    }
}
