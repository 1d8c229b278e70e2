//! Trusted reverse proxy ranges.
//!
//! A peer inside one of these blocks may speak for the client through
//! `X-Forwarded-For` / `X-Real-IP`; any other peer is attributed to its own
//! socket address. Dual-stack listeners report IPv4 peers as
//! `::ffff:a.b.c.d`, which is matched against IPv4 blocks.

use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrError {
    #[error("invalid address in `{0}`")]
    Address(String),

    #[error("invalid prefix length in `{0}`")]
    Prefix(String),
}

/// Address block in CIDR notation. A bare address is a single-host block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let (network, addr, width) = match (self.network, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                (u128::from(u32::from(net)), u128::from(u32::from(addr)), 32)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => (u128::from(net), u128::from(addr), 128),
            _ => return false,
        };

        let host_bits = width - u32::from(self.prefix_len);
        let mask = u128::MAX.checked_shl(host_bits).unwrap_or(0);
        (network ^ addr) & mask == 0
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (raw, None),
        };

        let network: IpAddr = addr
            .parse()
            .map_err(|_| CidrError::Address(raw.to_string()))?;
        let max = if network.is_ipv4() { 32 } else { 128 };

        let prefix_len = match prefix {
            None => max,
            Some(prefix) => prefix
                .parse::<u8>()
                .ok()
                .filter(|len| *len <= max)
                .ok_or_else(|| CidrError::Prefix(raw.to_string()))?,
        };

        Ok(Self {
            network,
            prefix_len,
        })
    }
}

/// The configured set of trusted proxy blocks. Empty means "no validation".
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    ranges: Vec<Cidr>,
}

impl TrustedProxies {
    /// Parse `TRUSTED_PROXIES` entries. Invalid entries are logged and skipped;
    /// configuration validation rejects them before startup.
    pub fn from_config(entries: &[String]) -> Self {
        let ranges: Vec<Cidr> = entries
            .iter()
            .filter_map(|entry| match entry.parse() {
                Ok(range) => Some(range),
                Err(e) => {
                    warn!(error = %e, "Skipping trusted proxy entry");
                    None
                }
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges loaded");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}
