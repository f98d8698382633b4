//! CIDR blocks matched by bit mask

use std::fmt;
use std::net::Ipv4Addr;

/// An IPv4 network in CIDR form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Block {
    network: u32,
    mask: u32,
    prefix: u8,
}

impl Ipv4Block {
    /// Build a block from its base address and prefix length
    ///
    /// Host bits in `base` are cleared. Prefixes above 32 are clamped.
    pub const fn new(base: Ipv4Addr, prefix: u8) -> Self {
        let prefix = if prefix > 32 { 32 } else { prefix };
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix as u32)
        };
        Self {
            network: base.to_bits() & mask,
            mask,
            prefix,
        }
    }

    /// Whether `ip` lies inside this block
    #[inline]
    pub const fn contains(&self, ip: Ipv4Addr) -> bool {
        ip.to_bits() & self.mask == self.network
    }
}

impl fmt::Display for Ipv4Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from_bits(self.network), self.prefix)
    }
}
