/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashSet;
use std::net::Ipv4Addr;

use chrono::Utc;
use stratus_network::range::host_part;
use stratus_uuid::guest::GuestId;

use model::guest_network::MAX_IFNAME_LEN;
use model::network::Network;

use crate::{DatabaseError, DatabaseResult};

const HASH_SUFFIX_LEN: usize = 3;
const MAX_HASH_TRIES: usize = 10;

/// Pick an interface name for a new NIC that no live NIC on the network
/// holds.
///
/// Physical NICs with an address get `<name>-<hostpart>`, where the host
/// part of the address under the network's mask makes the name stable across
/// reattaches. Virtual NICs, and physical ones whose natural name is taken,
/// fall back to `<name>-<hash>` with a 3-hex-digit digest over the guest and
/// network IDs, re-salted with the clock until it does not collide. The base
/// name is truncated so the final name fits [`MAX_IFNAME_LEN`].
pub fn free_ifname(
    network: &Network,
    guest_id: GuestId,
    ip: Option<Ipv4Addr>,
    is_virtual: bool,
    used: &HashSet<String>,
) -> DatabaseResult<String> {
    if !is_virtual {
        if let Some(ip) = ip {
            // Mask was validated on network create; treat failure as host part 0.
            let suffix = host_part(ip, network.mask).unwrap_or(0).to_string();
            let name = compose(&network.name, &suffix);
            if !used.contains(&name) {
                return Ok(name);
            }
        }
    }

    let mut name = hashed_ifname(network, guest_id, None);
    let mut tries = 0;
    while used.contains(&name) {
        tries += 1;
        if tries > MAX_HASH_TRIES {
            return Err(DatabaseError::TooManyAttempts {
                what: "ifname",
                tries: MAX_HASH_TRIES,
            });
        }
        let salt = format!("{}-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0), tries);
        name = hashed_ifname(network, guest_id, Some(&salt));
    }
    Ok(name)
}

fn hashed_ifname(network: &Network, guest_id: GuestId, salt: Option<&str>) -> String {
    let mut input = format!("{guest_id}{}", network.id);
    if let Some(salt) = salt {
        input.push_str(salt);
    }
    let digest = format!("{:x}", md5::compute(input.as_bytes()));
    compose(&network.name, &digest[..HASH_SUFFIX_LEN])
}

fn compose(network_name: &str, suffix: &str) -> String {
    let base: String = network_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let budget = MAX_IFNAME_LEN.saturating_sub(suffix.len() + 1);
    let base: String = base.chars().take(budget).collect();
    format!("{base}-{suffix}")
}

#[cfg(test)]
mod tests {
    use model::network::AllocPolicy;

    use super::*;

    fn network(name: &str) -> Network {
        let mut net = model::network::Network {
            id: stratus_uuid::network::NetworkId::new_random(),
            name: name.to_string(),
            wire_id: stratus_uuid::network::WireId::new_random(),
            range: stratus_network::range::AddressRange::new(
                "10.0.0.10".parse().unwrap(),
                "10.0.0.250".parse().unwrap(),
            )
            .unwrap(),
            mask: 24,
            gateway: None,
            dns: None,
            domain: None,
            vlan_id: 1,
            server_type: model::network::ServerType::Guest,
            alloc_policy: AllocPolicy::Stepdown,
            alloc_timeout_seconds: 0,
            status: model::network::NetworkStatus::Available,
            external_id: None,
        };
        net.validate().unwrap();
        net
    }

    #[test]
    fn test_host_part_suffix() {
        let net = network("prod");
        let guest = GuestId::new_random();
        let name = free_ifname(
            &net,
            guest,
            Some("10.0.0.42".parse().unwrap()),
            false,
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(name, "prod-42");
    }

    #[test]
    fn test_name_fits_budget() {
        // 9-char name plus a wide host part must still fit in 13.
        let mut net = network("verylongn");
        net.mask = 12;
        let guest = GuestId::new_random();
        let name = free_ifname(
            &net,
            guest,
            Some("10.15.255.255".parse().unwrap()),
            false,
            &HashSet::new(),
        )
        .unwrap();
        assert!(name.len() <= MAX_IFNAME_LEN, "{name}");
        assert!(name.contains('-'));
    }

    #[test]
    fn test_virtual_nic_gets_hashed_name() {
        let net = network("prod");
        let guest = GuestId::new_random();
        let name = free_ifname(&net, guest, None, true, &HashSet::new()).unwrap();
        assert!(name.starts_with("prod-"));
        assert_eq!(name.len(), "prod-".len() + HASH_SUFFIX_LEN);
        // Deterministic for the same guest and network.
        let again = free_ifname(&net, guest, None, true, &HashSet::new()).unwrap();
        assert_eq!(name, again);
    }

    #[test]
    fn test_taken_natural_name_falls_back_to_hash() {
        let net = network("prod");
        let guest = GuestId::new_random();
        let used: HashSet<String> = ["prod-42".to_string()].into_iter().collect();
        let name = free_ifname(&net, guest, Some("10.0.0.42".parse().unwrap()), false, &used)
            .unwrap();
        assert_ne!(name, "prod-42");
        assert!(name.len() <= MAX_IFNAME_LEN);
    }

    #[test]
    fn test_hash_collision_resalts() {
        let net = network("prod");
        let guest = GuestId::new_random();
        let first = free_ifname(&net, guest, None, true, &HashSet::new()).unwrap();
        let used: HashSet<String> = [first.clone()].into_iter().collect();
        let second = free_ifname(&net, guest, None, true, &used).unwrap();
        assert_ne!(first, second);
    }
}
