//! Admission of parsed addresses
//!
//! Always rejected:
//! - `0.0.0.0` (unspecified)
//! - `224.0.0.0/4` (multicast)
//! - `240.0.0.0/4` (reserved, includes limited broadcast `255.255.255.255`)
//!
//! Optionally rejected via [`FilterPolicy`]:
//! - `169.254.0.0/16` (link-local)
//! - `127.0.0.0/8` (loopback)
//!
//! Both optional ranges are admitted by default and then classify as public.
//! Private ranges are never rejected here.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::block::Ipv4Block;

const MULTICAST: Ipv4Block = Ipv4Block::new(Ipv4Addr::new(224, 0, 0, 0), 4);
const RESERVED: Ipv4Block = Ipv4Block::new(Ipv4Addr::new(240, 0, 0, 0), 4);
const LINK_LOCAL: Ipv4Block = Ipv4Block::new(Ipv4Addr::new(169, 254, 0, 0), 16);
const LOOPBACK: Ipv4Block = Ipv4Block::new(Ipv4Addr::new(127, 0, 0, 0), 8);

/// Optional exclusions on top of the fixed reject list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// Reject `169.254.0.0/16`
    #[serde(default)]
    pub reject_link_local: bool,

    /// Reject `127.0.0.0/8`
    #[serde(default)]
    pub reject_loopback: bool,
}

/// Decides whether an address is worth recording
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressFilter {
    policy: FilterPolicy,
}

impl AddressFilter {
    /// Create a filter applying `policy`
    pub fn new(policy: FilterPolicy) -> Self {
        Self { policy }
    }

    /// Whether `ip` should be classified and persisted
    pub fn is_admissible(&self, ip: Ipv4Addr) -> bool {
        if ip.is_unspecified() || MULTICAST.contains(ip) || RESERVED.contains(ip) {
            return false;
        }
        if self.policy.reject_link_local && LINK_LOCAL.contains(ip) {
            return false;
        }
        if self.policy.reject_loopback && LOOPBACK.contains(ip) {
            return false;
        }
        true
    }
}
