/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use mac_address::MacAddress;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use stratus_uuid::guest::{GuestId, GuestNetworkId};
use stratus_uuid::network::NetworkId;

use crate::network::{IpAllocationDirection, Network};
use crate::options::Options;

pub const DEFAULT_NIC_DRIVER: &str = "virtio";

/// Generated interface names must fit in the kernel's IFNAMSIZ budget once
/// the host prepends its own tagging.
pub const MAX_IFNAME_LEN: usize = 13;

/// One NIC of a guest, bound to a network. `(network_id, ip_addr)` is unique
/// among live non-virtual rows, `mac_addr` globally, `(guest_id, index)` per
/// guest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestNetwork {
    pub row_id: GuestNetworkId,
    pub guest_id: GuestId,
    pub network_id: NetworkId,
    pub mac_addr: MacAddress,
    /// Empty only for virtual NICs.
    pub ip_addr: Option<Ipv4Addr>,
    /// Carried through from upstream clouds; never allocated locally.
    pub ip6_addr: Option<Ipv6Addr>,
    pub driver: String,
    pub bw_limit: i32,
    pub index: i16,
    pub is_virtual: bool,
    pub ifname: String,
    /// When set, this NIC is a follower teamed with the NIC owning that MAC.
    pub team_with: Option<MacAddress>,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl GuestNetwork {
    /// The address shown to consumers: virtual NICs display the network
    /// address as a placeholder.
    pub fn display_ip(&self, network: &Network) -> Ipv4Addr {
        match self.ip_addr {
            Some(ip) => ip,
            None => network.net_addr(),
        }
    }

    /// The effective bandwidth in Mbps. A zero limit falls back to the
    /// wire's default, then the global default. Follower NICs carry no
    /// bandwidth of their own.
    pub fn bandwidth(&self, wire_default: Option<i32>, options: &Options) -> i32 {
        if self.team_with.is_some() {
            return 0;
        }
        if self.bw_limit > 0 {
            return self.bw_limit;
        }
        wire_default
            .filter(|bw| *bw > 0)
            .unwrap_or(options.default_bandwidth)
    }
}

impl<'r> FromRow<'r, PgRow> for GuestNetwork {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let ip_addr = match row.try_get::<Option<IpAddr>, _>("ip_addr")? {
            Some(IpAddr::V4(v4)) => Some(v4),
            _ => None,
        };
        let ip6_addr = match row.try_get::<Option<IpAddr>, _>("ip6_addr")? {
            Some(IpAddr::V6(v6)) => Some(v6),
            _ => None,
        };
        Ok(GuestNetwork {
            row_id: row.try_get("row_id")?,
            guest_id: row.try_get("guest_id")?,
            network_id: row.try_get("network_id")?,
            mac_addr: row.try_get("mac_addr")?,
            ip_addr,
            ip6_addr,
            driver: row.try_get("driver")?,
            bw_limit: row.try_get("bw_limit")?,
            index: row.try_get("index")?,
            is_virtual: row.try_get("virtual")?,
            ifname: row.try_get("ifname")?,
            team_with: row.try_get("team_with")?,
            created_at: row.try_get("created_at")?,
            deleted: row.try_get("deleted")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

/// The insertable subset of a guestnetworks row; the store mints the row ID
/// and timestamps.
#[derive(Debug, Clone)]
pub struct NewGuestNetwork {
    pub guest_id: GuestId,
    pub network_id: NetworkId,
    pub mac_addr: MacAddress,
    pub ip_addr: Option<Ipv4Addr>,
    pub driver: String,
    pub bw_limit: i32,
    pub index: i16,
    pub is_virtual: bool,
    pub ifname: String,
    pub team_with: Option<MacAddress>,
}

/// Caller-facing attach parameters. The zero value asks for a fresh
/// automatic allocation on the next free index.
#[derive(Debug, Clone)]
pub struct NicConfig {
    /// Candidate address, or None for automatic selection.
    pub address: Option<Ipv4Addr>,
    /// MAC suggestion; cleared after the first generation attempt.
    pub mac: Option<MacAddress>,
    /// NIC driver; defaults to the guest OS profile driver, else virtio.
    pub driver: Option<String>,
    pub bw_limit: i32,
    pub is_virtual: bool,
    /// Claim `address` out of the reserved pool instead of the free pool.
    pub reserved: bool,
    pub alloc_direction: IpAllocationDirection,
    /// Fail instead of falling back when `address` cannot be honored.
    pub require_designated_ip: bool,
    /// Interface name hint; regenerated when already taken on the network.
    pub ifname: Option<String>,
    pub team_with_mac: Option<MacAddress>,
    /// NIC index within the guest; negative means next free.
    pub index: i32,
    /// Attach even while the network is not in `available` status. Used by
    /// sync paths that trail the upstream cloud.
    pub ignore_network_status: bool,
}

impl Default for NicConfig {
    fn default() -> Self {
        NicConfig {
            address: None,
            mac: None,
            driver: None,
            bw_limit: 0,
            is_virtual: false,
            reserved: false,
            alloc_direction: IpAllocationDirection::default(),
            require_designated_ip: false,
            ifname: None,
            team_with_mac: None,
            index: -1,
            ignore_network_status: false,
        }
    }
}
