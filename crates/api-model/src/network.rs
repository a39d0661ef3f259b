/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use stratus_network::range::{net_addr, AddressRange};
use stratus_uuid::network::{NetworkId, WireId};

use crate::options::Options;

/// Network names end up embedded in generated interface names, which are
/// capped at 13 characters, so the name itself is kept short.
pub const MAX_NETWORK_NAME_LEN: usize = 9;

/// Guest networks are never wider than a /12 or narrower than a /30.
pub const MIN_GUEST_IP_MASK: u8 = 12;
pub const MAX_GUEST_IP_MASK: u8 = 30;

/// How many uniform samples the random policy takes before falling back to a
/// step-up scan.
const RANDOM_ALLOC_TRIES: usize = 5;

/// Errors out of the pure allocation contract. The database layer wraps
/// these into its own error type.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("candidate address {candidate} is out of range")]
    CandidateOutOfRange { candidate: Ipv4Addr },

    #[error("out of IP addresses")]
    AddressExhausted,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Init,
    Pending,
    Available,
    Failed,
    #[default]
    Unknown,
    StartDelete,
    Deleting,
    Deleted,
    DeleteFailed,
}

/// The per-network allocation policy. `None` defers to the direction the
/// caller asked for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AllocPolicy {
    #[default]
    Stepdown,
    Stepup,
    Random,
    None,
}

impl AllocPolicy {
    /// The direction this policy pins allocation to, if any.
    pub fn direction(&self) -> Option<IpAllocationDirection> {
        match self {
            AllocPolicy::Stepdown => Some(IpAllocationDirection::Stepdown),
            AllocPolicy::Stepup => Some(IpAllocationDirection::Stepup),
            AllocPolicy::Random => Some(IpAllocationDirection::Random),
            AllocPolicy::None => None,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IpAllocationDirection {
    #[default]
    Stepdown,
    Stepup,
    Random,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    #[default]
    Guest,
    Baremetal,
    Container,
}

/// A named, bounded IPv4 range with a mask and allocation policy, attached
/// to a layer-2 wire. The range bounds are arbitrary addresses inside the
/// wire's subnet, so the usable window excludes whatever the operator carved
/// out (gateway, infrastructure addresses, ...) by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub name: String,
    pub wire_id: WireId,
    pub range: AddressRange,
    pub mask: u8,
    pub gateway: Option<Ipv4Addr>,
    pub dns: Option<String>,
    pub domain: Option<String>,
    pub vlan_id: i32,
    pub server_type: ServerType,
    pub alloc_policy: AllocPolicy,
    /// Addresses released within this window are blocked from immediate
    /// reuse. Zero disables the grace window.
    pub alloc_timeout_seconds: i32,
    pub status: NetworkStatus,
    pub external_id: Option<String>,
}

impl Network {
    /// Validation applied on create and on any update that touches the
    /// range. Range-vs-sibling overlap is a database-level check and lives
    /// in the store.
    pub fn validate(&self) -> Result<(), NetworkValidationError> {
        if self.name.is_empty()
            || self.name.len() > MAX_NETWORK_NAME_LEN
            || !self.name.is_ascii()
        {
            return Err(NetworkValidationError::InvalidName(self.name.clone()));
        }
        if !(MIN_GUEST_IP_MASK..=MAX_GUEST_IP_MASK).contains(&self.mask) {
            return Err(NetworkValidationError::InvalidMask(self.mask));
        }
        Ok(())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.range.contains(ip)
    }

    /// The network address of the range under the network's mask. Virtual
    /// NICs display this as their placeholder address.
    pub fn net_addr(&self) -> Ipv4Addr {
        // The mask was validated to <= 30, so this cannot fail.
        net_addr(self.range.start(), self.mask).unwrap_or_else(|_| self.range.start())
    }

    pub fn alloc_timeout(&self) -> Duration {
        Duration::seconds(i64::from(self.alloc_timeout_seconds.max(0)))
    }

    /// The DNS server guests on this network should use, falling back to the
    /// global default.
    pub fn dns_server(&self, options: &Options) -> Option<String> {
        self.dns
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| options.dns_server.clone())
    }

    pub fn dns_domain(&self, options: &Options) -> Option<String> {
        self.domain
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| options.dns_domain.clone())
    }

    /// Find a free address. `addr_table` is the set of addresses currently
    /// claimed by anything on the network (including active reservations),
    /// `recent_table` the set of addresses still inside the release grace
    /// window; both only ever get membership-tested.
    ///
    /// A candidate outside the range is an error. An occupied candidate is
    /// not: allocation falls through to the directional scan, and it is the
    /// caller's job to reject the result if the candidate was mandatory.
    pub fn free_ip(
        &self,
        addr_table: &HashSet<Ipv4Addr>,
        recent_table: &HashSet<Ipv4Addr>,
        candidate: Option<Ipv4Addr>,
        direction: IpAllocationDirection,
    ) -> Result<Ipv4Addr, AllocationError> {
        let is_used =
            |ip: &Ipv4Addr| -> bool { addr_table.contains(ip) || recent_table.contains(ip) };

        if let Some(candidate) = candidate {
            if !self.range.contains(candidate) {
                return Err(AllocationError::CandidateOutOfRange { candidate });
            }
            if !is_used(&candidate) {
                return Ok(candidate);
            }
        }

        // The network's own policy wins over whatever the caller asked for.
        let direction = self.alloc_policy.direction().unwrap_or(direction);

        if direction == IpAllocationDirection::Random {
            for _ in 0..RANDOM_ALLOC_TRIES {
                let ip = self.range.random();
                if !is_used(&ip) {
                    return Ok(ip);
                }
            }
            // Degrade to a deterministic scan rather than sampling forever
            // on a nearly full network.
        }

        match direction {
            IpAllocationDirection::Stepdown => self.range.iter_down().find(|ip| !is_used(ip)),
            IpAllocationDirection::Stepup | IpAllocationDirection::Random => {
                self.range.iter_up().find(|ip| !is_used(ip))
            }
        }
        .ok_or(AllocationError::AddressExhausted)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkValidationError {
    #[error("network name {0:?} must be 1-9 ASCII characters")]
    InvalidName(String),

    #[error("guest IP mask {0} is outside 12..=30")]
    InvalidMask(u8),
}

fn ipv4_column(row: &PgRow, column: &str) -> Result<Ipv4Addr, sqlx::Error> {
    match row.try_get::<IpAddr, _>(column)? {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(v6) => Err(sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: format!("expected an IPv4 address, got {v6}").into(),
        }),
    }
}

fn parsed_column<T: FromStr>(row: &PgRow, column: &str) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    T::from_str(&raw).map_err(|_| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unrecognized value {raw:?}").into(),
    })
}

impl<'r> FromRow<'r, PgRow> for Network {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let start = ipv4_column(row, "guest_ip_start")?;
        let end = ipv4_column(row, "guest_ip_end")?;
        let range = AddressRange::new(start, end).map_err(|e| sqlx::Error::ColumnDecode {
            index: "guest_ip_start".to_string(),
            source: e.to_string().into(),
        })?;
        let gateway = match row.try_get::<Option<IpAddr>, _>("guest_gateway")? {
            Some(IpAddr::V4(v4)) => Some(v4),
            _ => None,
        };
        Ok(Network {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            wire_id: row.try_get("wire_id")?,
            range,
            mask: row.try_get::<i16, _>("guest_ip_mask")? as u8,
            gateway,
            dns: row.try_get("guest_dns")?,
            domain: row.try_get("guest_domain")?,
            vlan_id: row.try_get("vlan_id")?,
            server_type: parsed_column(row, "server_type")?,
            alloc_policy: parsed_column(row, "alloc_policy")?,
            alloc_timeout_seconds: row.try_get("alloc_timeout_seconds")?,
            status: parsed_column(row, "status")?,
            external_id: row.try_get("external_id")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_network(start: &str, end: &str, policy: AllocPolicy) -> Network {
        Network {
            id: NetworkId::new_random(),
            name: "testnet".to_string(),
            wire_id: WireId::new_random(),
            range: AddressRange::new(start.parse().unwrap(), end.parse().unwrap()).unwrap(),
            mask: 24,
            gateway: Some("10.0.0.1".parse().unwrap()),
            dns: None,
            domain: None,
            vlan_id: 1,
            server_type: ServerType::Guest,
            alloc_policy: policy,
            alloc_timeout_seconds: 0,
            status: NetworkStatus::Available,
            external_id: None,
        }
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_stepdown_allocation_until_exhausted() {
        let net = test_network("10.0.0.10", "10.0.0.12", AllocPolicy::Stepdown);
        let mut used = HashSet::new();
        let recent = HashSet::new();

        for expected in ["10.0.0.12", "10.0.0.11", "10.0.0.10"] {
            let got = net
                .free_ip(&used, &recent, None, IpAllocationDirection::default())
                .unwrap();
            assert_eq!(got, ip(expected));
            used.insert(got);
        }
        assert!(matches!(
            net.free_ip(&used, &recent, None, IpAllocationDirection::default()),
            Err(AllocationError::AddressExhausted)
        ));
    }

    #[test]
    fn test_stepup_allocation() {
        let net = test_network("10.0.0.10", "10.0.0.12", AllocPolicy::Stepup);
        let got = net
            .free_ip(
                &HashSet::new(),
                &HashSet::new(),
                None,
                IpAllocationDirection::Stepdown,
            )
            .unwrap();
        // The network policy overrides the caller's direction.
        assert_eq!(got, ip("10.0.0.10"));
    }

    #[test]
    fn test_candidate_honored_and_occupied_falls_through() {
        let net = test_network("10.0.0.10", "10.0.0.12", AllocPolicy::Stepdown);
        let used: HashSet<Ipv4Addr> = [ip("10.0.0.12")].into_iter().collect();
        let recent = HashSet::new();

        let got = net
            .free_ip(
                &used,
                &recent,
                Some(ip("10.0.0.11")),
                IpAllocationDirection::default(),
            )
            .unwrap();
        assert_eq!(got, ip("10.0.0.11"));

        // An occupied candidate falls through to the stepdown scan.
        let got = net
            .free_ip(
                &used,
                &recent,
                Some(ip("10.0.0.12")),
                IpAllocationDirection::default(),
            )
            .unwrap();
        assert_eq!(got, ip("10.0.0.11"));
    }

    #[test]
    fn test_candidate_out_of_range() {
        let net = test_network("10.0.0.10", "10.0.0.12", AllocPolicy::Stepdown);
        assert!(matches!(
            net.free_ip(
                &HashSet::new(),
                &HashSet::new(),
                Some(ip("10.0.1.1")),
                IpAllocationDirection::default()
            ),
            Err(AllocationError::CandidateOutOfRange { .. })
        ));
    }

    #[test]
    fn test_recently_released_blocks_allocation() {
        let net = test_network("10.0.0.10", "10.0.0.10", AllocPolicy::Stepdown);
        let recent: HashSet<Ipv4Addr> = [ip("10.0.0.10")].into_iter().collect();
        assert!(matches!(
            net.free_ip(
                &HashSet::new(),
                &recent,
                None,
                IpAllocationDirection::default()
            ),
            Err(AllocationError::AddressExhausted)
        ));
    }

    #[test]
    fn test_random_policy_degrades_to_stepup() {
        let net = test_network("10.0.0.10", "10.0.0.12", AllocPolicy::Random);
        // Leave exactly one address free; the 5 random samples may all miss,
        // and the fallback scan must still find it.
        let used: HashSet<Ipv4Addr> = [ip("10.0.0.10"), ip("10.0.0.11")].into_iter().collect();
        let got = net
            .free_ip(&used, &HashSet::new(), None, IpAllocationDirection::default())
            .unwrap();
        assert_eq!(got, ip("10.0.0.12"));
    }

    #[test]
    fn test_random_policy_stays_in_range() {
        let net = test_network("10.0.0.10", "10.0.0.12", AllocPolicy::Random);
        for _ in 0..32 {
            let got = net
                .free_ip(
                    &HashSet::new(),
                    &HashSet::new(),
                    None,
                    IpAllocationDirection::default(),
                )
                .unwrap();
            assert!(net.contains(got));
        }
    }

    #[test]
    fn test_validate() {
        let mut net = test_network("10.0.0.10", "10.0.0.12", AllocPolicy::Stepdown);
        net.validate().unwrap();

        net.name = "way-too-long-name".to_string();
        assert!(matches!(
            net.validate(),
            Err(NetworkValidationError::InvalidName(_))
        ));

        net.name = "ok".to_string();
        net.mask = 31;
        assert!(matches!(
            net.validate(),
            Err(NetworkValidationError::InvalidMask(31))
        ));
        net.mask = 11;
        assert!(net.validate().is_err());
        net.mask = 12;
        net.validate().unwrap();
    }

    #[test]
    fn test_status_round_trips_as_string() {
        assert_eq!(NetworkStatus::StartDelete.to_string(), "start_delete");
        assert_eq!(
            "delete_failed".parse::<NetworkStatus>().unwrap(),
            NetworkStatus::DeleteFailed
        );
        assert_eq!(
            "stepdown".parse::<AllocPolicy>().unwrap(),
            AllocPolicy::Stepdown
        );
    }
}
