//! Linux socket error queue for datagram ICMP sockets
//!
//! Unprivileged ping sockets never see time-exceeded or unreachable messages
//! on the normal receive path. With `IP_RECVERR`/`IPV6_RECVERR` enabled the
//! kernel queues them instead, tagged with a `sock_extended_err` whose
//! offender address is the router that answered.

use super::packet::{id_and_seq, ReplyKind};
use socket2::Socket;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::AsRawFd;

const SO_EE_ORIGIN_ICMP: u8 = 2;
const SO_EE_ORIGIN_ICMP6: u8 = 3;

const ICMP_DEST_UNREACH: u8 = 3;
const ICMP_TIME_EXCEEDED: u8 = 11;
const ICMPV6_DEST_UNREACH: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;

/// Size of `struct sock_extended_err`
const EXTENDED_ERR_LEN: usize = 16;

/// Ask the kernel to queue ICMP errors for this socket
pub(crate) fn enable(socket: &Socket, target: IpAddr) -> std::io::Result<()> {
    let (level, name) = match target {
        IpAddr::V4(_) => (libc::IPPROTO_IP, libc::IP_RECVERR),
        IpAddr::V6(_) => (libc::IPPROTO_IPV6, libc::IPV6_RECVERR),
    };
    let enable: libc::c_int = 1;
    // SAFETY: the option value points to a live c_int of the stated length
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &enable as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Drain the error queue, returning the first error raised by our echo
///
/// Never blocks. Entries for other sequence numbers are discarded.
pub(crate) fn take_reply(socket: &Socket, sequence: u16) -> Option<(ReplyKind, IpAddr)> {
    let mut data = [0u8; 512];
    // u64 storage keeps the control buffer aligned for cmsghdr
    let mut control = [0u64; 64];

    loop {
        let mut iov = libc::iovec {
            iov_base: data.as_mut_ptr() as *mut libc::c_void,
            iov_len: data.len(),
        };
        // SAFETY: msghdr is plain data; all-zero is a valid empty header
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = std::mem::size_of_val(&control) as _;

        // SAFETY: every buffer referenced by msg outlives the call
        let received = unsafe {
            libc::recvmsg(
                socket.as_raw_fd(),
                &mut msg,
                libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT,
            )
        };
        if received < 0 {
            return None;
        }

        // The queued payload is the echo request we sent
        let payload = &data[..(received as usize).min(data.len())];
        if id_and_seq(payload).is_none_or(|(_, seq)| seq != sequence) {
            continue;
        }

        // SAFETY: cmsg pointers come from the CMSG_* helpers over msg, and
        // the kernel filled msg_controllen bytes of the control buffer
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                let header = &*cmsg;
                if is_recverr(header.cmsg_level, header.cmsg_type) {
                    let len = (header.cmsg_len as usize)
                        .saturating_sub(libc::CMSG_LEN(0) as usize);
                    let bytes = std::slice::from_raw_parts(libc::CMSG_DATA(cmsg), len);
                    if let Some(found) = parse_extended_err(bytes) {
                        return Some(found);
                    }
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }
    }
}

fn is_recverr(level: libc::c_int, kind: libc::c_int) -> bool {
    (level == libc::IPPROTO_IP && kind == libc::IP_RECVERR)
        || (level == libc::IPPROTO_IPV6 && kind == libc::IPV6_RECVERR)
}

/// Decode a `sock_extended_err` followed by its offender address
fn parse_extended_err(bytes: &[u8]) -> Option<(ReplyKind, IpAddr)> {
    if bytes.len() < EXTENDED_ERR_LEN {
        return None;
    }
    let (origin, ee_type, ee_code) = (bytes[4], bytes[5], bytes[6]);
    let kind = match (origin, ee_type) {
        (SO_EE_ORIGIN_ICMP, ICMP_TIME_EXCEEDED) | (SO_EE_ORIGIN_ICMP6, ICMPV6_TIME_EXCEEDED) => {
            ReplyKind::TimeExceeded
        }
        (SO_EE_ORIGIN_ICMP, ICMP_DEST_UNREACH) | (SO_EE_ORIGIN_ICMP6, ICMPV6_DEST_UNREACH) => {
            ReplyKind::Unreachable(ee_code)
        }
        _ => return None,
    };
    Some((kind, offender(&bytes[EXTENDED_ERR_LEN..])?))
}

/// Address out of a raw `sockaddr_in` / `sockaddr_in6`
fn offender(sockaddr: &[u8]) -> Option<IpAddr> {
    let family = i32::from(u16::from_ne_bytes([*sockaddr.first()?, *sockaddr.get(1)?]));
    if family == libc::AF_INET {
        let octets: [u8; 4] = sockaddr.get(4..8)?.try_into().ok()?;
        Some(IpAddr::V4(Ipv4Addr::from(octets)))
    } else if family == libc::AF_INET6 {
        let octets: [u8; 16] = sockaddr.get(8..24)?.try_into().ok()?;
        Some(IpAddr::V6(Ipv6Addr::from(octets)))
    } else {
        None
    }
}
