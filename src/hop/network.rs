//! Address classification for discovered hops

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Network class of a hop's replying address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetworkClass {
    /// 127.0.0.0/8 or ::1
    Loopback,
    /// 10.0.0.0/8
    PrivateA,
    /// 172.16.0.0/12
    PrivateB,
    /// 192.168.0.0/16
    PrivateC,
    /// 169.254.0.0/16
    LinkLocal,
    /// Anything routable
    Public,
    /// No address (hop did not reply)
    #[default]
    Unknown,
}

const CLASS_RANGES: [(Ipv4Net, NetworkClass); 4] = [
    (Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 8), NetworkClass::PrivateA),
    (Ipv4Net::new_assert(Ipv4Addr::new(172, 16, 0, 0), 12), NetworkClass::PrivateB),
    (Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 0, 0), 16), NetworkClass::PrivateC),
    (Ipv4Net::new_assert(Ipv4Addr::new(169, 254, 0, 0), 16), NetworkClass::LinkLocal),
];

impl NetworkClass {
    /// Classify an optional hop address
    pub fn classify(addr: Option<IpAddr>) -> Self {
        let Some(addr) = addr else {
            return NetworkClass::Unknown;
        };
        if addr.is_loopback() {
            return NetworkClass::Loopback;
        }
        match addr {
            IpAddr::V4(v4) => classify_v4(v4),
            IpAddr::V6(_) => NetworkClass::Public,
        }
    }

    /// Whether geolocation providers should be asked about this address
    pub fn is_public(&self) -> bool {
        matches!(self, NetworkClass::Public)
    }
}

fn classify_v4(addr: Ipv4Addr) -> NetworkClass {
    CLASS_RANGES
        .iter()
        .find(|(net, _)| net.contains(&addr))
        .map_or(NetworkClass::Public, |(_, class)| *class)
}

impl std::fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkClass::Loopback => write!(f, "Loopback"),
            NetworkClass::PrivateA => write!(f, "Private (Class A)"),
            NetworkClass::PrivateB => write!(f, "Private (Class B)"),
            NetworkClass::PrivateC => write!(f, "Private (Class C)"),
            NetworkClass::LinkLocal => write!(f, "Link-Local"),
            NetworkClass::Public => write!(f, "Public"),
            NetworkClass::Unknown => write!(f, "N/A"),
        }
    }
}
