/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Attaching and detaching guest NICs: address selection, MAC and interface
//! name generation, reservation handling, and the post-commit side effects.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Utc;
use stratus_network::mac::MacPrefix;
use stratus_uuid::guest::GuestId;
use stratus_uuid::network::NetworkId;

use model::guest_network::{GuestNetwork, NewGuestNetwork, NicConfig, DEFAULT_NIC_DRIVER};
use model::network::{AllocationError, IpAllocationDirection, Network, NetworkStatus};
use model::options::Options;
use model::reserved_ip::ReservedIp;

use crate::locks::KeyedLocks;
use crate::stores::{
    AddressClaimant, GuestNetworkStore, MacClaimant, NetworkSideEffects, NetworkStore,
    ReservedIpStore,
};
use crate::{address_table, ifname, mac, DatabaseError, DatabaseResult};

/// The NIC engine. Owns the per-network and per-guest mutexes, so one
/// instance must be shared by every caller that mutates NICs.
pub struct GuestNicManager {
    networks: Arc<dyn NetworkStore>,
    guest_nics: Arc<dyn GuestNetworkStore>,
    reserved_ips: Arc<dyn ReservedIpStore>,
    address_claimants: Vec<Arc<dyn AddressClaimant>>,
    mac_claimants: Vec<Arc<dyn MacClaimant>>,
    side_effects: Arc<dyn NetworkSideEffects>,
    options: Options,
    mac_prefix: MacPrefix,
    network_locks: KeyedLocks<NetworkId>,
    pub(crate) guest_locks: KeyedLocks<GuestId>,
}

impl GuestNicManager {
    pub fn new(
        networks: Arc<dyn NetworkStore>,
        guest_nics: Arc<dyn GuestNetworkStore>,
        reserved_ips: Arc<dyn ReservedIpStore>,
        side_effects: Arc<dyn NetworkSideEffects>,
        options: Options,
    ) -> DatabaseResult<Self> {
        let mac_prefix = MacPrefix::parse(&options.global_mac_prefix)
            .map_err(|_| DatabaseError::InvalidMacPrefix(options.global_mac_prefix.clone()))?;
        Ok(GuestNicManager {
            networks,
            guest_nics,
            reserved_ips,
            address_claimants: Vec::new(),
            mac_claimants: Vec::new(),
            side_effects,
            options,
            mac_prefix,
            network_locks: KeyedLocks::new(),
            guest_locks: KeyedLocks::new(),
        })
    }

    /// Register an auxiliary table whose rows pin addresses on a network.
    pub fn with_address_claimant(mut self, claimant: Arc<dyn AddressClaimant>) -> Self {
        self.address_claimants.push(claimant);
        self
    }

    /// Register an auxiliary table whose rows pin MAC addresses.
    pub fn with_mac_claimant(mut self, claimant: Arc<dyn MacClaimant>) -> Self {
        self.mac_claimants.push(claimant);
        self
    }

    pub fn networks(&self) -> &dyn NetworkStore {
        self.networks.as_ref()
    }

    pub fn guest_nics(&self) -> &dyn GuestNetworkStore {
        self.guest_nics.as_ref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Attach `guest_id` to `network` with the given config. On success the
    /// new NIC row is committed; DNS and netmap side effects are best-effort
    /// and logged on failure.
    pub async fn attach_network(
        &self,
        guest_id: GuestId,
        network: &Network,
        config: NicConfig,
    ) -> DatabaseResult<GuestNetwork> {
        let _guest_guard = self.guest_locks.lock(guest_id).await;
        self.attach_locked(guest_id, network, config).await
    }

    /// Attach with the guest mutex already held (the reconciler holds it
    /// across a whole sync pass).
    pub(crate) async fn attach_locked(
        &self,
        guest_id: GuestId,
        network: &Network,
        config: NicConfig,
    ) -> DatabaseResult<GuestNetwork> {
        if network.status != NetworkStatus::Available && !config.ignore_network_status {
            return Err(DatabaseError::NetworkNotAvailable {
                network_id: network.id,
                status: network.status,
            });
        }

        // Serialize allocation per network so concurrent attaches don't pick
        // the same address off the same snapshot.
        let _net_guard = self.network_locks.lock(network.id).await;

        let existing = self.guest_nics.list_for_guest(guest_id).await?;
        let index = self.resolve_index(guest_id, &existing, config.index)?;

        let mut consumed: Option<ReservedIp> = None;
        let ip_addr = if config.is_virtual {
            None
        } else {
            Some(self.resolve_address(network, &config, &mut consumed).await?)
        };

        // From here on a consumed reservation must be put back on failure.
        match self
            .insert_nic(guest_id, network, &config, index, ip_addr)
            .await
        {
            Ok(row) => {
                self.run_attach_side_effects(&row, network).await;
                tracing::info!(
                    %guest_id,
                    network_id = %network.id,
                    mac_addr = %row.mac_addr,
                    ip_addr = ?row.ip_addr,
                    ifname = %row.ifname,
                    index = row.index,
                    "attached guest NIC"
                );
                Ok(row)
            }
            Err(err) => {
                if let Some(reservation) = consumed {
                    self.restore_reservation(reservation).await;
                }
                Err(err)
            }
        }
    }

    fn resolve_index(
        &self,
        guest_id: GuestId,
        existing: &[GuestNetwork],
        requested: i32,
    ) -> DatabaseResult<i16> {
        if requested < 0 {
            return Ok(existing.len() as i16);
        }
        let index = i16::try_from(requested)
            .map_err(|_| DatabaseError::internal(format!("NIC index {requested} out of range")))?;
        if existing.iter().any(|nic| nic.index == index) {
            return Err(DatabaseError::DuplicateNicIndex { guest_id, index });
        }
        Ok(index)
    }

    /// Pick the address for a new physical NIC. The reserved path consumes
    /// an active reservation for the candidate; the free path scans the
    /// usable range around the claimed and recently released tables.
    async fn resolve_address(
        &self,
        network: &Network,
        config: &NicConfig,
        consumed: &mut Option<ReservedIp>,
    ) -> DatabaseResult<Ipv4Addr> {
        if config.reserved {
            let Some(candidate) = config.address else {
                return Err(DatabaseError::ReservedAddressNotFound {
                    network_id: network.id,
                    address: None,
                });
            };
            let Some(reservation) = self.reserved_ips.get_active(network.id, candidate).await?
            else {
                return Err(DatabaseError::ReservedAddressNotFound {
                    network_id: network.id,
                    address: Some(candidate),
                });
            };
            self.reserved_ips.consume(reservation.id).await?;
            *consumed = Some(reservation);
            return Ok(candidate);
        }

        let addr_table = self.address_table(network.id).await?;
        let recent = self
            .guest_nics
            .recently_released(network.id, network.alloc_timeout())
            .await?;
        let got = network
            .free_ip(&addr_table, &recent, config.address, config.alloc_direction)
            .map_err(|e| match e {
                AllocationError::CandidateOutOfRange { candidate } => {
                    DatabaseError::CandidateOutOfRange {
                        network_id: network.id,
                        candidate,
                    }
                }
                AllocationError::AddressExhausted => DatabaseError::AddressExhausted {
                    network_id: network.id,
                },
            })?;
        if let Some(want) = config.address {
            if got != want && config.require_designated_ip {
                return Err(DatabaseError::CandidateOccupied { candidate: want });
            }
        }
        Ok(got)
    }

    async fn insert_nic(
        &self,
        guest_id: GuestId,
        network: &Network,
        config: &NicConfig,
        index: i16,
        ip_addr: Option<Ipv4Addr>,
    ) -> DatabaseResult<GuestNetwork> {
        let used_ifnames = self.guest_nics.used_ifnames(network.id).await?;
        let ifname = match config
            .ifname
            .clone()
            .filter(|name| !used_ifnames.contains(name))
        {
            Some(hint) => hint,
            None => ifname::free_ifname(network, guest_id, ip_addr, config.is_virtual, &used_ifnames)?,
        };
        let driver = config
            .driver
            .clone()
            .unwrap_or_else(|| DEFAULT_NIC_DRIVER.to_string());
        // Followers carry no bandwidth of their own.
        let bw_limit = if config.team_with_mac.is_some() {
            0
        } else {
            config.bw_limit.max(0)
        };

        // The unique index on mac_addr is the real arbiter; on a duplicate
        // we regenerate the MAC and try again. Address and ifname were
        // resolved under the network lock and are kept.
        let mut suggestion = config.mac;
        for _ in 0..mac::MAX_TRIES {
            let mac_addr = mac::generate_mac(
                self.guest_nics.as_ref(),
                &self.mac_claimants,
                suggestion.take(),
                self.mac_prefix,
            )
            .await?;
            let row = NewGuestNetwork {
                guest_id,
                network_id: network.id,
                mac_addr,
                ip_addr,
                driver: driver.clone(),
                bw_limit,
                index,
                is_virtual: config.is_virtual,
                ifname: ifname.clone(),
                team_with: config.team_with_mac,
            };
            match self.guest_nics.insert(row).await {
                Ok(inserted) => return Ok(inserted),
                Err(err) if err.is_mac_conflict() => {
                    tracing::warn!(%mac_addr, "lost mac insert race, regenerating");
                }
                Err(err) => return Err(err),
            }
        }
        Err(DatabaseError::TooManyAttempts {
            what: "mac address",
            tries: mac::MAX_TRIES,
        })
    }

    /// Detach a NIC. With `reserve` the freed address goes straight into the
    /// reserved pool instead of the free pool, so a paired re-attach can
    /// claim it back.
    pub async fn detach_network(&self, row: &GuestNetwork, reserve: bool) -> DatabaseResult<()> {
        let _guest_guard = self.guest_locks.lock(row.guest_id).await;
        self.detach_locked(row, reserve).await
    }

    pub(crate) async fn detach_locked(
        &self,
        row: &GuestNetwork,
        reserve: bool,
    ) -> DatabaseResult<()> {
        self.guest_nics.delete(row.row_id).await?;
        tracing::info!(
            guest_id = %row.guest_id,
            network_id = %row.network_id,
            mac_addr = %row.mac_addr,
            ip_addr = ?row.ip_addr,
            reserve,
            "detached guest NIC"
        );

        if let Some(ip) = row.ip_addr {
            self.run_detach_side_effects(row, ip).await;
            if reserve {
                self.reserved_ips
                    .reserve(row.network_id, ip, "Delete to reserve", None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Find (and for `reserved` consume) a free address without attaching
    /// anything. Exposed for API-level dry runs and address pickers.
    pub async fn free_ip(
        &self,
        network: &Network,
        candidate: Option<Ipv4Addr>,
        direction: IpAllocationDirection,
        reserved: bool,
    ) -> DatabaseResult<Ipv4Addr> {
        let _net_guard = self.network_locks.lock(network.id).await;
        let config = NicConfig {
            address: candidate,
            reserved,
            alloc_direction: direction,
            ..NicConfig::default()
        };
        let mut consumed = None;
        self.resolve_address(network, &config, &mut consumed).await
    }

    /// Reserve an address on a network. The address must be inside the range
    /// and not currently claimed by anything.
    pub async fn reserve_ip(
        &self,
        network: &Network,
        ip: Ipv4Addr,
        notes: &str,
        valid_for: Option<chrono::Duration>,
    ) -> DatabaseResult<ReservedIp> {
        if !network.contains(ip) {
            return Err(DatabaseError::CandidateOutOfRange {
                network_id: network.id,
                candidate: ip,
            });
        }
        let _net_guard = self.network_locks.lock(network.id).await;
        let addr_table = self.address_table(network.id).await?;
        if addr_table.contains(&ip) {
            return Err(DatabaseError::DuplicateAddress {
                network_id: network.id,
                ip,
            });
        }
        self.reserved_ips.reserve(network.id, ip, notes, valid_for).await
    }

    /// Release a reserved address back to the free pool.
    pub async fn release_reserved_ip(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> DatabaseResult<()> {
        self.reserved_ips.release(network_id, ip).await
    }

    pub(crate) async fn address_table(
        &self,
        network_id: NetworkId,
    ) -> DatabaseResult<HashSet<Ipv4Addr>> {
        address_table::build_address_table(
            network_id,
            self.guest_nics.as_ref(),
            &self.address_claimants,
            self.reserved_ips.as_ref(),
        )
        .await
    }

    async fn restore_reservation(&self, reservation: ReservedIp) {
        let remaining = reservation.expired_at.map(|at| at - Utc::now());
        if let Err(err) = self
            .reserved_ips
            .reserve(
                reservation.network_id,
                reservation.ip_addr,
                &reservation.notes,
                remaining,
            )
            .await
        {
            tracing::error!(
                network_id = %reservation.network_id,
                ip_addr = %reservation.ip_addr,
                error = %err,
                "failed to restore consumed reservation after attach failure"
            );
        }
    }

    async fn run_attach_side_effects(&self, row: &GuestNetwork, network: &Network) {
        let Some(ip) = row.ip_addr else { return };
        if let (Some(_server), Some(domain)) = (
            network.dns_server(&self.options),
            network.dns_domain(&self.options),
        ) {
            let fqdn = format!("{}.{domain}", row.guest_id);
            if let Err(err) = self.side_effects.dns_add(&fqdn, ip).await {
                tracing::warn!(%fqdn, %ip, error = %err, "DNS record add failed");
            }
        }
        if let Err(err) = self.side_effects.netmap_update(row.guest_id, ip, false).await {
            tracing::warn!(guest_id = %row.guest_id, %ip, error = %err, "netmap update failed");
        }
    }

    async fn run_detach_side_effects(&self, row: &GuestNetwork, ip: Ipv4Addr) {
        let network = match self.networks.find(row.network_id).await {
            Ok(Some(network)) => Some(network),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(network_id = %row.network_id, error = %err, "network lookup failed");
                None
            }
        };
        if let Some(network) = network {
            if let (Some(_server), Some(domain)) = (
                network.dns_server(&self.options),
                network.dns_domain(&self.options),
            ) {
                let fqdn = format!("{}.{domain}", row.guest_id);
                if let Err(err) = self.side_effects.dns_remove(&fqdn, ip).await {
                    tracing::warn!(%fqdn, %ip, error = %err, "DNS record removal failed");
                }
            }
        }
        if let Err(err) = self.side_effects.netmap_update(row.guest_id, ip, true).await {
            tracing::warn!(guest_id = %row.guest_id, %ip, error = %err, "netmap update failed");
        }
    }
}
