//! IP classification and DNS pinning
//!
//! A URL that passed the safety check must be fetched from exactly the
//! addresses that were vetted. Re-resolving the hostname at connect time would
//! reopen the window for DNS rebinding, so fetch clients are pinned:
//!
//! - [`pin_url`] rewrites the host of a URL to a vetted IP literal
//! - [`PinnedResolver`] answers lookups for one hostname from the vetted set
//!   only, and is installed into the `reqwest` client for the fetch

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// Errors raised by the pinning helpers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("no vetted addresses to pin to")]
    EmptyIpSet,

    #[error("URL cannot carry an IP host: {0}")]
    CannotPin(String),

    #[error("invalid IP range {0:?}")]
    InvalidRange(String),
}

/// A CIDR block, e.g. `169.254.169.254/32` or `fd00:ec2::254/128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    /// Build a range, masking off host bits of `network`.
    pub fn new(network: IpAddr, prefix: u8) -> Result<Self, PinError> {
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(PinError::InvalidRange(format!("{network}/{prefix}")));
        }
        let network = match network {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix))),
            IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix))),
        };
        Ok(Self { network, prefix })
    }

    /// Whether `ip` falls inside this range. Families never match each other.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                u32::from(*ip) & v4_mask(self.prefix) == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                u128::from(*ip) & v6_mask(self.prefix) == u128::from(net)
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for IpRange {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| PinError::InvalidRange(s.to_string()))?;
                (addr, Some(prefix))
            }
            None => (s, None),
        };
        let network: IpAddr = addr
            .parse()
            .map_err(|_| PinError::InvalidRange(s.to_string()))?;
        let prefix = prefix.unwrap_or(match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        });
        Self::new(network, prefix)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Cloud metadata endpoints blocked by default (AWS/GCP/Azure, Alibaba, AWS IPv6).
pub const DEFAULT_METADATA_RANGES: &[&str] =
    &["169.254.169.254/32", "100.100.100.200/32", "fd00:ec2::254/128"];

/// Parse [`DEFAULT_METADATA_RANGES`].
pub fn default_metadata_ranges() -> Vec<IpRange> {
    DEFAULT_METADATA_RANGES
        .iter()
        .filter_map(|r| r.parse().ok())
        .collect()
}

/// Whether an address must never be contacted on behalf of a transcript.
///
/// Covers loopback, unspecified, private (RFC1918 and IPv6 ULA), link-local,
/// carrier-grade NAT, multicast, broadcast, documentation and reserved ranges,
/// plus any configured metadata ranges. IPv4-mapped, NAT64 and 6to4 IPv6
/// addresses are judged by the IPv4 address they embed. IPv4-compatible
/// (`::a.b.c.d`) and Teredo addresses are always unsafe.
pub fn is_unsafe_ip(ip: &IpAddr, metadata_ranges: &[IpRange]) -> bool {
    if metadata_ranges.iter().any(|range| range.contains(ip)) {
        return true;
    }
    match ip {
        IpAddr::V4(v4) => is_unsafe_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = embedded_v4(v6) {
                let v4 = IpAddr::V4(v4);
                return metadata_ranges.iter().any(|range| range.contains(&v4))
                    || is_unsafe_ip(&v4, &[]);
            }
            is_unsafe_v6(v6)
        }
    }
}

fn is_unsafe_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
        // 0.0.0.0/8 "this network"
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 192.0.0.0/24 IETF protocol assignments
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 198.18.0.0/15 benchmarking
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240
}

fn is_unsafe_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
        // fec0::/10 deprecated site-local
        || (first & 0xffc0) == 0xfec0
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
        // 2001::/32 Teredo
        || (first == 0x2001 && ip.segments()[1] == 0)
        // ::/96 deprecated IPv4-compatible
        || ip.segments()[..6] == [0; 6]
}

/// IPv4 address carried inside an IPv4-mapped (`::ffff:a.b.c.d`), NAT64
/// (`64:ff9b::a.b.c.d`) or 6to4 (`2002:aabb:ccdd::`) address.
fn embedded_v4(ip: &Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let segments = ip.segments();
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        let bits = u128::from(*ip) as u32;
        return Some(Ipv4Addr::from(bits));
    }
    if segments[0] == 0x2002 {
        let bits = (u128::from(*ip) >> 80) as u32;
        return Some(Ipv4Addr::from(bits));
    }
    None
}

/// Rewrite the host of `url` to the literal `ip`, keeping scheme, port, path,
/// query and fragment.
pub fn pin_url(url: &Url, ip: IpAddr) -> Result<Url, PinError> {
    let mut pinned = url.clone();
    pinned
        .set_ip_host(ip)
        .map_err(|_| PinError::CannotPin(url.as_str().to_string()))?;
    Ok(pinned)
}

/// Resolver override for a single hostname, answering only from a vetted set.
#[derive(Debug, Clone)]
pub struct PinnedResolver {
    host: String,
    ips: Vec<IpAddr>,
}

impl PinnedResolver {
    /// Create a resolver for `host`. Fails if `ips` is empty.
    pub fn new(host: impl Into<String>, ips: Vec<IpAddr>) -> Result<Self, PinError> {
        if ips.is_empty() {
            return Err(PinError::EmptyIpSet);
        }
        Ok(Self {
            host: host.into(),
            ips,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ips(&self) -> &[IpAddr] {
        &self.ips
    }

    /// A uniformly random address from the vetted set.
    pub fn pick(&self) -> IpAddr {
        self.ips[random_index(self.ips.len())]
    }

    /// Every vetted address as a socket address, rotated so the first entry
    /// is a random pick. The connector tries them in order.
    pub fn socket_addrs(&self, port: u16) -> Vec<SocketAddr> {
        let start = random_index(self.ips.len());
        self.ips
            .iter()
            .cycle()
            .skip(start)
            .take(self.ips.len())
            .map(|ip| SocketAddr::new(*ip, port))
            .collect()
    }

    /// Install this resolver into a client builder. Lookups of the pinned host
    /// are answered from the vetted set and never reach the system resolver.
    pub fn install(&self, builder: reqwest::ClientBuilder, port: u16) -> reqwest::ClientBuilder {
        builder.resolve_to_addrs(&self.host, &self.socket_addrs(port))
    }
}

fn random_index(len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let mut buf = [0u8; 8];
    match getrandom::fill(&mut buf) {
        Ok(()) => (u64::from_le_bytes(buf) % len as u64) as usize,
        // Entropy failure only costs load spreading; every entry is vetted.
        Err(_) => 0,
    }
}
