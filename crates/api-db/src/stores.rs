/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Storage seams of the NIC engine. The Postgres implementations live in
//! [`crate::pg`]; [`crate::testing`] carries in-memory ones.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use chrono::Duration;
use mac_address::MacAddress;
use stratus_uuid::guest::GuestId;
use stratus_uuid::network::{NetworkId, ReservedIpId};

use model::guest_network::{GuestNetwork, NewGuestNetwork};
use model::network::Network;
use model::reserved_ip::ReservedIp;

use crate::DatabaseResult;

#[async_trait]
pub trait NetworkStore: Send + Sync {
    async fn find(&self, id: NetworkId) -> DatabaseResult<Option<Network>>;

    /// Resolve a provider-side network ID reported by an upstream cloud.
    async fn find_by_external_id(&self, external_id: &str) -> DatabaseResult<Option<Network>>;
}

#[async_trait]
pub trait GuestNetworkStore: Send + Sync {
    /// Live NICs of a guest, ordered by NIC index.
    async fn list_for_guest(&self, guest_id: GuestId) -> DatabaseResult<Vec<GuestNetwork>>;

    /// The live NIC holding `ip` on `network_id`, if any.
    async fn find_by_ip(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> DatabaseResult<Option<GuestNetwork>>;

    /// Insert a new NIC row. Uniqueness of the MAC, the `(network, ip)`
    /// pair, and the `(guest, index)` pair is enforced here and surfaced as
    /// the matching `Duplicate*` error.
    async fn insert(&self, row: NewGuestNetwork) -> DatabaseResult<GuestNetwork>;

    /// Soft-delete a NIC row, stamping `deleted_at`.
    async fn delete(&self, row_id: stratus_uuid::guest::GuestNetworkId) -> DatabaseResult<()>;

    /// Addresses of NICs soft-deleted within the last `within` on the
    /// network. These are held out of allocation as a lease-collision guard.
    async fn recently_released(
        &self,
        network_id: NetworkId,
        within: Duration,
    ) -> DatabaseResult<HashSet<Ipv4Addr>>;

    /// Interface names taken by live NICs on the network.
    async fn used_ifnames(&self, network_id: NetworkId) -> DatabaseResult<HashSet<String>>;

    /// Addresses held by live NICs on the network.
    async fn list_ips_on_network(&self, network_id: NetworkId)
        -> DatabaseResult<HashSet<Ipv4Addr>>;

    /// Whether any live NIC anywhere holds `mac`.
    async fn mac_in_use(&self, mac: MacAddress) -> DatabaseResult<bool>;
}

#[async_trait]
pub trait ReservedIpStore: Send + Sync {
    /// Reserve an address. Fails with a conflict while an active reservation
    /// for the same `(network, ip)` exists.
    async fn reserve(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
        notes: &str,
        valid_for: Option<Duration>,
    ) -> DatabaseResult<ReservedIp>;

    /// The active, unexpired reservation for `(network, ip)`, if any.
    async fn get_active(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> DatabaseResult<Option<ReservedIp>>;

    /// Consume a reservation: the address moves from the reserved pool into
    /// a NIC. The caller re-reserves on rollback.
    async fn consume(&self, id: ReservedIpId) -> DatabaseResult<()>;

    /// Drop the active reservation for `(network, ip)`, returning the
    /// address to the free pool.
    async fn release(&self, network_id: NetworkId, ip: Ipv4Addr) -> DatabaseResult<()>;

    async fn list_active(&self, network_id: NetworkId) -> DatabaseResult<Vec<ReservedIp>>;

    /// Sweep reservations whose expiry has passed. Returns how many rows
    /// were dropped.
    async fn purge_expired(&self) -> DatabaseResult<u64>;
}

/// A table besides guestnetworks whose rows pin addresses on a network:
/// group NICs, host NICs, load balancers, DB instances, bare network
/// interfaces, elastic IPs. Allocation must avoid all of them.
#[async_trait]
pub trait AddressClaimant: Send + Sync {
    /// A short table label for logs.
    fn name(&self) -> &'static str;

    async fn list_ips_on_network(&self, network_id: NetworkId)
        -> DatabaseResult<HashSet<Ipv4Addr>>;
}

/// A table besides guestnetworks whose rows pin MAC addresses (tap
/// services). MAC generation must avoid them.
#[async_trait]
pub trait MacClaimant: Send + Sync {
    fn name(&self) -> &'static str;

    async fn mac_in_use(&self, mac: MacAddress) -> DatabaseResult<bool>;
}

/// The consumed seam to a cloud provider driver. Implementations live with
/// the provider SDKs; the engine only ever reads from them.
#[async_trait]
pub trait CloudNicSource: Send + Sync {
    /// The guest's NICs as the cloud reports them, in the provider's stable
    /// interface order.
    async fn list_nics(&self, guest_id: GuestId)
        -> eyre::Result<Vec<model::remote_nic::RemoteNic>>;
}

/// Post-commit side effects of NIC churn. Failures here are logged and
/// swallowed; the row churn is already committed.
#[async_trait]
pub trait NetworkSideEffects: Send + Sync {
    async fn dns_add(&self, fqdn: &str, ip: Ipv4Addr) -> eyre::Result<()>;

    async fn dns_remove(&self, fqdn: &str, ip: Ipv4Addr) -> eyre::Result<()>;

    /// Nudge the host netmap after an address appears or disappears.
    async fn netmap_update(&self, guest_id: GuestId, ip: Ipv4Addr, removed: bool)
        -> eyre::Result<()>;
}
