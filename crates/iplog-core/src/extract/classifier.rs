//! Private/public partition
//!
//! An address is private iff it falls in one of the RFC 1918 blocks.
//! Membership is tested with CIDR masks, so `172.15.0.0` and `172.32.0.1`
//! are public while `172.31.255.255` is private.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use super::block::Ipv4Block;

/// RFC 1918 private blocks
pub const PRIVATE_BLOCKS: [Ipv4Block; 3] = [
    Ipv4Block::new(Ipv4Addr::new(10, 0, 0, 0), 8),
    Ipv4Block::new(Ipv4Addr::new(172, 16, 0, 0), 12),
    Ipv4Block::new(Ipv4Addr::new(192, 168, 0, 0), 16),
];

/// Classification of an admitted address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressClass {
    /// Inside an RFC 1918 block
    Private,
    /// Everything else
    Public,
}

impl AddressClass {
    /// Both classes, private first
    pub const ALL: [AddressClass; 2] = [AddressClass::Private, AddressClass::Public];

    /// Default name of the collection holding this class
    pub fn default_collection(&self) -> &'static str {
        match self {
            AddressClass::Private => "private_ips",
            AddressClass::Public => "public_ips",
        }
    }

    /// Lowercase label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressClass::Private => "private",
            AddressClass::Public => "public",
        }
    }
}

impl fmt::Display for AddressClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels admitted addresses as private or public
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressClassifier;

impl AddressClassifier {
    /// Classify `ip`
    pub fn classify(&self, ip: Ipv4Addr) -> AddressClass {
        if PRIVATE_BLOCKS.iter().any(|block| block.contains(ip)) {
            AddressClass::Private
        } else {
            AddressClass::Public
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(s: &str) -> AddressClass {
        AddressClassifier.classify(s.parse().unwrap())
    }

    #[test]
    fn private_ranges() {
        for private in [
            "10.0.0.0",
            "10.255.255.255",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.0.0",
            "192.168.255.255",
        ] {
            assert_eq!(classify(private), AddressClass::Private, "{}", private);
        }
    }

    #[test]
    fn public_neighbours_of_private_ranges() {
        for public in [
            "9.255.255.255",
            "11.0.0.0",
            "172.15.0.0",
            "172.15.255.255",
            "172.32.0.1",
            "192.167.255.255",
            "192.169.0.0",
            "8.8.8.8",
            "203.0.113.5",
        ] {
            assert_eq!(classify(public), AddressClass::Public, "{}", public);
        }
    }

    #[test]
    fn special_ranges_classify_as_public() {
        assert_eq!(classify("169.254.1.1"), AddressClass::Public);
        assert_eq!(classify("127.0.0.1"), AddressClass::Public);
        assert_eq!(classify("100.64.0.1"), AddressClass::Public);
    }

    #[test]
    fn labels() {
        assert_eq!(AddressClass::Private.to_string(), "private");
        assert_eq!(AddressClass::Public.as_str(), "public");
    }
}
