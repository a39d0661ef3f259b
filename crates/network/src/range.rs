/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::net::Ipv4Addr;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AddressRangeError {
    #[error("range start {start} is above range end {end}")]
    StartAboveEnd { start: Ipv4Addr, end: Ipv4Addr },

    #[error("mask length {0} is out of bounds")]
    MaskOutOfBounds(u8),
}

/// An inclusive `[start, end]` IPv4 address range. Unlike a CIDR prefix, the
/// bounds are arbitrary addresses, so the usable part of a subnet can be
/// expressed without its network and broadcast addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl AddressRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self, AddressRangeError> {
        if u32::from(start) > u32::from(end) {
            return Err(AddressRangeError::StartAboveEnd { start, end });
        }
        Ok(AddressRange { start, end })
    }

    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        u32::from(self.start) <= ip && ip <= u32::from(self.end)
    }

    /// The number of addresses in the range. Inclusive bounds, so this is
    /// never zero.
    pub fn address_count(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }

    /// A uniformly random address from the range.
    pub fn random(&self) -> Ipv4Addr {
        let pick = rand::rng().random_range(u32::from(self.start)..=u32::from(self.end));
        Ipv4Addr::from(pick)
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        u32::from(self.start) <= u32::from(other.end)
            && u32::from(other.start) <= u32::from(self.end)
    }

    /// Iterate from the range start up to the range end.
    pub fn iter_up(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        (u32::from(self.start)..=u32::from(self.end)).map(Ipv4Addr::from)
    }

    /// Iterate from the range end down to the range start.
    pub fn iter_down(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        (u32::from(self.start)..=u32::from(self.end))
            .rev()
            .map(Ipv4Addr::from)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The netmask for a prefix length, e.g. 24 -> 255.255.255.0.
pub fn netmask(mask: u8) -> Result<u32, AddressRangeError> {
    match mask {
        0 => Ok(0),
        1..=32 => Ok(u32::MAX << (32 - mask)),
        _ => Err(AddressRangeError::MaskOutOfBounds(mask)),
    }
}

/// The network address of `ip` under `mask`.
pub fn net_addr(ip: Ipv4Addr, mask: u8) -> Result<Ipv4Addr, AddressRangeError> {
    Ok(Ipv4Addr::from(u32::from(ip) & netmask(mask)?))
}

/// The host part of `ip` under `mask`, i.e. `ip & !netmask`. Used as the
/// numeric suffix of generated interface names.
pub fn host_part(ip: Ipv4Addr, mask: u8) -> Result<u32, AddressRangeError> {
    Ok(u32::from(ip) & !netmask(mask)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> AddressRange {
        AddressRange::new(start.parse().unwrap(), end.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_bounds() {
        assert!(AddressRange::new("10.0.0.2".parse().unwrap(), "10.0.0.1".parse().unwrap()).is_err());

        let r = range("10.0.0.10", "10.0.0.12");
        assert_eq!(r.address_count(), 3);
        assert!(r.contains("10.0.0.10".parse().unwrap()));
        assert!(r.contains("10.0.0.12".parse().unwrap()));
        assert!(!r.contains("10.0.0.13".parse().unwrap()));
    }

    #[test]
    fn test_single_address_range() {
        let r = range("10.0.0.1", "10.0.0.1");
        assert_eq!(r.address_count(), 1);
        assert_eq!(r.random(), "10.0.0.1".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_iteration() {
        let r = range("10.0.0.10", "10.0.0.12");
        let up: Vec<String> = r.iter_up().map(|ip| ip.to_string()).collect();
        assert_eq!(up, vec!["10.0.0.10", "10.0.0.11", "10.0.0.12"]);
        let down: Vec<String> = r.iter_down().map(|ip| ip.to_string()).collect();
        assert_eq!(down, vec!["10.0.0.12", "10.0.0.11", "10.0.0.10"]);
    }

    #[test]
    fn test_overlaps() {
        let a = range("10.0.0.10", "10.0.0.20");
        assert!(a.overlaps(&range("10.0.0.20", "10.0.0.30")));
        assert!(a.overlaps(&range("10.0.0.1", "10.0.0.10")));
        assert!(a.overlaps(&range("10.0.0.12", "10.0.0.15")));
        assert!(!a.overlaps(&range("10.0.0.21", "10.0.0.30")));
    }

    #[test]
    fn test_random_within_range() {
        let r = range("10.0.0.10", "10.0.0.12");
        for _ in 0..64 {
            assert!(r.contains(r.random()));
        }
    }

    #[test]
    fn test_host_part() {
        let ip: Ipv4Addr = "192.168.1.37".parse().unwrap();
        assert_eq!(host_part(ip, 24).unwrap(), 37);
        assert_eq!(host_part(ip, 16).unwrap(), 256 + 37);
        assert_eq!(
            net_addr(ip, 24).unwrap(),
            "192.168.1.0".parse::<Ipv4Addr>().unwrap()
        );
    }

    #[test]
    fn test_netmask_bounds() {
        assert_eq!(netmask(24).unwrap(), 0xffffff00);
        assert_eq!(netmask(32).unwrap(), u32::MAX);
        assert_eq!(netmask(0).unwrap(), 0);
        assert!(netmask(33).is_err());
    }
}
