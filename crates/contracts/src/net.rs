//! Net value type and address masking
//!
//! `Net` pairs an optional IP address with a prefix length. Its canonical
//! text form is `<ip>/<prefixlen>`, or `<nil>` when the address is absent,
//! and that is also its serde representation.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const NIL: &str = "<nil>";

/// Net parse / construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("missing prefix length in '{0}'")]
    MissingPrefix(String),

    #[error("invalid ip address '{0}'")]
    InvalidAddress(String),

    #[error("invalid prefix length '{0}'")]
    InvalidPrefix(String),

    #[error("prefix length {prefix} out of range for {ip} (max {max})")]
    PrefixOutOfRange { ip: IpAddr, prefix: u8, max: u8 },
}

/// An IP address with a prefix length
///
/// An absent address always carries prefix length 0, so the `<nil>` form
/// round-trips exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Net {
    ip: Option<IpAddr>,
    prefix_len: u8,
}

impl Net {
    /// Create a net, checking the prefix length against the address family
    pub fn new(ip: IpAddr, prefix_len: u8) -> Result<Self, NetError> {
        let max = max_prefix(&ip);
        if prefix_len > max {
            return Err(NetError::PrefixOutOfRange {
                ip,
                prefix: prefix_len,
                max,
            });
        }
        Ok(Self {
            ip: Some(ip),
            prefix_len,
        })
    }

    /// The absent net (`<nil>`)
    pub fn absent() -> Self {
        Self::default()
    }

    /// The network containing `ip` with the given prefix
    pub fn masked(ip: IpAddr, prefix_len: u8) -> Result<Self, NetError> {
        let network = mask_addr(ip, prefix_len)?;
        Self::new(network, prefix_len)
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_absent(&self) -> bool {
        self.ip.is_none()
    }
}

impl fmt::Display for Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{}/{}", ip, self.prefix_len),
            None => f.write_str(NIL),
        }
    }
}

impl FromStr for Net {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == NIL {
            return Ok(Self::absent());
        }
        let (ip, prefix) = s
            .rsplit_once('/')
            .ok_or_else(|| NetError::MissingPrefix(s.to_string()))?;
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| NetError::InvalidAddress(ip.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| NetError::InvalidPrefix(prefix.to_string()))?;
        Self::new(ip, prefix)
    }
}

impl Serialize for Net {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Net {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Zero every bit of `ip` beyond the first `prefix_len` bits
pub fn mask_addr(ip: IpAddr, prefix_len: u8) -> Result<IpAddr, NetError> {
    IpNetwork::new(ip, prefix_len)
        .map(|network| network.network())
        .map_err(|_| NetError::PrefixOutOfRange {
            ip,
            prefix: prefix_len,
            max: max_prefix(&ip),
        })
}

/// Per-family prefix truncation used to anonymize exported addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMasker {
    ipv4_prefix: u8,
    ipv6_prefix: u8,
}

impl AddressMasker {
    pub fn new(ipv4_prefix: u8, ipv6_prefix: u8) -> Result<Self, NetError> {
        if ipv4_prefix > 32 {
            return Err(NetError::InvalidPrefix(format!("IPv4 /{ipv4_prefix}")));
        }
        if ipv6_prefix > 128 {
            return Err(NetError::InvalidPrefix(format!("IPv6 /{ipv6_prefix}")));
        }
        Ok(Self {
            ipv4_prefix,
            ipv6_prefix,
        })
    }

    pub fn ipv4_prefix(&self) -> u8 {
        self.ipv4_prefix
    }

    pub fn ipv6_prefix(&self) -> u8 {
        self.ipv6_prefix
    }

    /// Mask an optional address; absent stays absent
    pub fn mask(&self, ip: Option<IpAddr>) -> Option<IpAddr> {
        ip.map(|ip| self.net_of(ip)).and_then(|net| net.ip())
    }

    /// The masked network for `ip`, with the prefix of its family
    pub fn net_of(&self, ip: IpAddr) -> Net {
        let prefix = match ip {
            IpAddr::V4(_) => self.ipv4_prefix,
            IpAddr::V6(_) => self.ipv6_prefix,
        };
        // prefixes are range checked in `new`
        Net::masked(ip, prefix).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_net_text_form() {
        let net = Net::new("192.168.0.1".parse().unwrap(), 32).unwrap();
        assert_eq!(net.to_string(), "192.168.0.1/32");
        assert_eq!(serde_json::to_string(&net).unwrap(), r#""192.168.0.1/32""#);

        let back: Net = serde_json::from_str(r#""192.168.0.1/32""#).unwrap();
        assert_eq!(back, net);

        let v6 = Net::new("2001:db8::1".parse().unwrap(), 48).unwrap();
        assert_eq!(serde_json::to_string(&v6).unwrap(), r#""2001:db8::1/48""#);
        let back: Net = serde_json::from_str(r#""2001:db8::1/48""#).unwrap();
        assert_eq!(back.to_string(), "2001:db8::1/48");
    }

    #[test]
    fn test_net_absent_round_trip() {
        let net = Net::absent();
        let json = serde_json::to_string(&net).unwrap();
        assert_eq!(json, r#""<nil>""#);

        let back: Net = serde_json::from_str(&json).unwrap();
        assert!(back.ip().is_none());
        assert_eq!(back, net);
    }

    #[test]
    fn test_net_rejects_bad_input() {
        assert!(matches!(
            "10.0.0.1".parse::<Net>(),
            Err(NetError::MissingPrefix(_))
        ));
        assert!(matches!(
            "10.0.0.1/33".parse::<Net>(),
            Err(NetError::PrefixOutOfRange { .. })
        ));
        assert!(matches!(
            "::1/129".parse::<Net>(),
            Err(NetError::PrefixOutOfRange { .. })
        ));
        assert!(matches!(
            "nope/8".parse::<Net>(),
            Err(NetError::InvalidAddress(_))
        ));
        assert!(matches!(
            "10.0.0.0/x".parse::<Net>(),
            Err(NetError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_mask_addr_examples() {
        let ip: IpAddr = "203.0.113.77".parse().unwrap();
        assert_eq!(mask_addr(ip, 24).unwrap().to_string(), "203.0.113.0");
        assert_eq!(mask_addr(ip, 0).unwrap().to_string(), "0.0.0.0");
        assert_eq!(mask_addr(ip, 32).unwrap(), ip);

        let ip6: IpAddr = "2001:db8:abcd:12::1".parse().unwrap();
        assert_eq!(mask_addr(ip6, 48).unwrap().to_string(), "2001:db8:abcd::");
    }

    #[test]
    fn test_masker_per_family() {
        let masker = AddressMasker::new(24, 48).unwrap();
        assert_eq!(
            masker.mask(Some("198.51.100.9".parse().unwrap())),
            Some("198.51.100.0".parse().unwrap())
        );
        assert_eq!(
            masker.mask(Some("2001:db8:1:2:3::4".parse().unwrap())),
            Some("2001:db8:1::".parse().unwrap())
        );
        assert_eq!(masker.mask(None), None);
        assert_eq!(
            masker.net_of("198.51.100.9".parse().unwrap()).to_string(),
            "198.51.100.0/24"
        );
        assert!(AddressMasker::new(33, 48).is_err());
        assert!(AddressMasker::new(24, 129).is_err());
    }

    fn arb_net() -> impl Strategy<Value = Net> {
        prop_oneof![
            Just(Net::absent()),
            (any::<u32>(), 0u8..=32)
                .prop_map(|(bits, p)| Net::new(IpAddr::V4(Ipv4Addr::from(bits)), p).unwrap()),
            (any::<u128>(), 0u8..=128)
                .prop_map(|(bits, p)| Net::new(IpAddr::V6(Ipv6Addr::from(bits)), p).unwrap()),
        ]
    }

    proptest! {
        #[test]
        fn prop_net_round_trip(net in arb_net()) {
            let parsed: Net = net.to_string().parse().unwrap();
            prop_assert_eq!(parsed, net);
        }

        #[test]
        fn prop_mask_v4_zeroes_host_bits(bits in any::<u32>(), prefix in 0u8..=32) {
            let masked = mask_addr(IpAddr::V4(Ipv4Addr::from(bits)), prefix).unwrap();
            let expected = if prefix == 0 { 0 } else { bits & (u32::MAX << (32 - prefix as u32)) };
            prop_assert_eq!(masked, IpAddr::V4(Ipv4Addr::from(expected)));
        }

        #[test]
        fn prop_mask_v6_zeroes_host_bits(bits in any::<u128>(), prefix in 0u8..=128) {
            let masked = mask_addr(IpAddr::V6(Ipv6Addr::from(bits)), prefix).unwrap();
            let expected = if prefix == 0 { 0 } else { bits & (u128::MAX << (128 - prefix as u32)) };
            prop_assert_eq!(masked, IpAddr::V6(Ipv6Addr::from(expected)));
        }
    }
}
