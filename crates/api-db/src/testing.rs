/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! In-memory store implementations for tests. They enforce the same
//! uniqueness rules the Postgres schema does, so engine tests exercise the
//! conflict paths without a database.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mac_address::MacAddress;
use stratus_uuid::guest::{GuestId, GuestNetworkId};
use stratus_uuid::network::{NetworkId, ReservedIpId};

use model::guest_network::{GuestNetwork, NewGuestNetwork};
use model::network::Network;
use model::options::Options;
use model::reserved_ip::ReservedIp;

use crate::attach::GuestNicManager;
use crate::stores::{
    AddressClaimant, GuestNetworkStore, MacClaimant, NetworkSideEffects, NetworkStore,
    ReservedIpStore,
};
use crate::{DatabaseError, DatabaseResult};

/// One struct backs all three stores; `Arc<InMemoryStore>` coerces into each
/// store trait object separately.
#[derive(Default)]
pub struct InMemoryStore {
    networks: Mutex<Vec<Network>>,
    rows: Mutex<Vec<GuestNetwork>>,
    reservations: Mutex<Vec<ReservedIp>>,
    forced_mac_conflicts: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryStore::default())
    }

    pub fn add_network(&self, network: Network) {
        self.networks.lock().unwrap().push(network);
    }

    pub fn live_rows(&self) -> Vec<GuestNetwork> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| !row.deleted)
            .cloned()
            .collect()
    }

    /// Rewrite a soft-deleted row's deletion time, so release-grace tests
    /// don't have to sleep.
    pub fn backdate_release(&self, row_id: GuestNetworkId, deleted_at: DateTime<Utc>) {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.row_id == row_id && row.deleted {
                row.deleted_at = Some(deleted_at);
            }
        }
    }

    /// Make the next `n` inserts lose the MAC unique-index race, the way a
    /// concurrent attach that committed first would.
    pub fn force_mac_conflicts(&self, n: usize) {
        self.forced_mac_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn active_reservations(&self, network_id: NetworkId) -> Vec<ReservedIp> {
        let now = Utc::now();
        self.reservations
            .lock()
            .unwrap()
            .iter()
            .filter(|rip| rip.network_id == network_id && rip.is_active(now))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NetworkStore for InMemoryStore {
    async fn find(&self, id: NetworkId) -> DatabaseResult<Option<Network>> {
        Ok(self
            .networks
            .lock()
            .unwrap()
            .iter()
            .find(|net| net.id == id)
            .cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> DatabaseResult<Option<Network>> {
        Ok(self
            .networks
            .lock()
            .unwrap()
            .iter()
            .find(|net| net.external_id.as_deref() == Some(external_id))
            .cloned())
    }
}

#[async_trait]
impl GuestNetworkStore for InMemoryStore {
    async fn list_for_guest(&self, guest_id: GuestId) -> DatabaseResult<Vec<GuestNetwork>> {
        let mut out: Vec<GuestNetwork> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.guest_id == guest_id && !row.deleted)
            .cloned()
            .collect();
        out.sort_by_key(|row| row.index);
        Ok(out)
    }

    async fn find_by_ip(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> DatabaseResult<Option<GuestNetwork>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| !row.deleted && row.network_id == network_id && row.ip_addr == Some(ip))
            .cloned())
    }

    async fn insert(&self, new: NewGuestNetwork) -> DatabaseResult<GuestNetwork> {
        if self
            .forced_mac_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DatabaseError::DuplicateMacAddress(new.mac_addr));
        }
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter().filter(|row| !row.deleted) {
            if row.mac_addr == new.mac_addr {
                return Err(DatabaseError::DuplicateMacAddress(new.mac_addr));
            }
            if !new.is_virtual
                && new.ip_addr.is_some()
                && row.network_id == new.network_id
                && row.ip_addr == new.ip_addr
            {
                return Err(DatabaseError::DuplicateAddress {
                    network_id: new.network_id,
                    ip: new.ip_addr.unwrap(),
                });
            }
            if row.guest_id == new.guest_id && row.index == new.index {
                return Err(DatabaseError::DuplicateNicIndex {
                    guest_id: new.guest_id,
                    index: new.index,
                });
            }
        }
        let row = GuestNetwork {
            row_id: GuestNetworkId::new_random(),
            guest_id: new.guest_id,
            network_id: new.network_id,
            mac_addr: new.mac_addr,
            ip_addr: new.ip_addr,
            ip6_addr: None,
            driver: new.driver,
            bw_limit: new.bw_limit,
            index: new.index,
            is_virtual: new.is_virtual,
            ifname: new.ifname,
            team_with: new.team_with,
            created_at: Utc::now(),
            deleted: false,
            deleted_at: None,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn delete(&self, row_id: GuestNetworkId) -> DatabaseResult<()> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.row_id == row_id && !row.deleted {
                row.deleted = true;
                row.deleted_at = Some(Utc::now());
                return Ok(());
            }
        }
        Err(DatabaseError::not_found("guest NIC", row_id))
    }

    async fn recently_released(
        &self,
        network_id: NetworkId,
        within: Duration,
    ) -> DatabaseResult<HashSet<Ipv4Addr>> {
        let cutoff = Utc::now() - within;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| {
                row.deleted
                    && row.network_id == network_id
                    && row.deleted_at.is_some_and(|at| at > cutoff)
            })
            .filter_map(|row| row.ip_addr)
            .collect())
    }

    async fn used_ifnames(&self, network_id: NetworkId) -> DatabaseResult<HashSet<String>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| !row.deleted && row.network_id == network_id)
            .map(|row| row.ifname.clone())
            .collect())
    }

    async fn list_ips_on_network(
        &self,
        network_id: NetworkId,
    ) -> DatabaseResult<HashSet<Ipv4Addr>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| !row.deleted && row.network_id == network_id)
            .filter_map(|row| row.ip_addr)
            .collect())
    }

    async fn mac_in_use(&self, mac: MacAddress) -> DatabaseResult<bool> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .any(|row| !row.deleted && row.mac_addr == mac))
    }
}

#[async_trait]
impl ReservedIpStore for InMemoryStore {
    async fn reserve(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
        notes: &str,
        valid_for: Option<Duration>,
    ) -> DatabaseResult<ReservedIp> {
        let now = Utc::now();
        let mut reservations = self.reservations.lock().unwrap();
        if reservations
            .iter()
            .any(|rip| rip.network_id == network_id && rip.ip_addr == ip && rip.is_active(now))
        {
            return Err(DatabaseError::Conflict(format!(
                "address {ip} is already reserved on network {network_id}"
            )));
        }
        let rip = ReservedIp {
            id: ReservedIpId::new_random(),
            network_id,
            ip_addr: ip,
            notes: notes.to_string(),
            expired_at: valid_for.map(|d| now + d),
            deleted_at: None,
        };
        reservations.push(rip.clone());
        Ok(rip)
    }

    async fn get_active(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> DatabaseResult<Option<ReservedIp>> {
        let now = Utc::now();
        Ok(self
            .reservations
            .lock()
            .unwrap()
            .iter()
            .find(|rip| rip.network_id == network_id && rip.ip_addr == ip && rip.is_active(now))
            .cloned())
    }

    async fn consume(&self, id: ReservedIpId) -> DatabaseResult<()> {
        let mut reservations = self.reservations.lock().unwrap();
        for rip in reservations.iter_mut() {
            if rip.id == id && rip.deleted_at.is_none() {
                rip.deleted_at = Some(Utc::now());
                return Ok(());
            }
        }
        Err(DatabaseError::not_found("reserved IP", id))
    }

    async fn release(&self, network_id: NetworkId, ip: Ipv4Addr) -> DatabaseResult<()> {
        let now = Utc::now();
        let mut reservations = self.reservations.lock().unwrap();
        for rip in reservations.iter_mut() {
            if rip.network_id == network_id && rip.ip_addr == ip && rip.is_active(now) {
                rip.deleted_at = Some(now);
                return Ok(());
            }
        }
        Err(DatabaseError::not_found("reserved IP", ip))
    }

    async fn list_active(&self, network_id: NetworkId) -> DatabaseResult<Vec<ReservedIp>> {
        Ok(self.active_reservations(network_id))
    }

    async fn purge_expired(&self) -> DatabaseResult<u64> {
        let now = Utc::now();
        let mut purged = 0;
        let mut reservations = self.reservations.lock().unwrap();
        for rip in reservations.iter_mut() {
            if rip.deleted_at.is_none() && rip.expired_at.is_some_and(|at| at <= now) {
                rip.deleted_at = Some(now);
                purged += 1;
            }
        }
        Ok(purged)
    }
}

/// A fixed claimant table, standing in for group NICs, elastic IPs and the
/// other auxiliary address holders.
pub struct StaticAddressClaimant {
    name: &'static str,
    ips: HashMap<NetworkId, HashSet<Ipv4Addr>>,
}

impl StaticAddressClaimant {
    pub fn new(name: &'static str, network_id: NetworkId, ips: &[Ipv4Addr]) -> Self {
        let mut map = HashMap::new();
        map.insert(network_id, ips.iter().copied().collect());
        StaticAddressClaimant { name, ips: map }
    }
}

#[async_trait]
impl AddressClaimant for StaticAddressClaimant {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn list_ips_on_network(
        &self,
        network_id: NetworkId,
    ) -> DatabaseResult<HashSet<Ipv4Addr>> {
        Ok(self.ips.get(&network_id).cloned().unwrap_or_default())
    }
}

/// A fixed MAC holder, standing in for the tap service table.
pub struct StaticMacClaimant {
    macs: HashSet<MacAddress>,
}

impl StaticMacClaimant {
    pub fn new(macs: &[MacAddress]) -> Self {
        StaticMacClaimant {
            macs: macs.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl MacClaimant for StaticMacClaimant {
    fn name(&self) -> &'static str {
        "static-macs"
    }

    async fn mac_in_use(&self, mac: MacAddress) -> DatabaseResult<bool> {
        Ok(self.macs.contains(&mac))
    }
}

/// A provider driver that reports a fixed NIC list for every guest.
pub struct StaticNicSource {
    pub nics: Vec<model::remote_nic::RemoteNic>,
}

#[async_trait]
impl crate::stores::CloudNicSource for StaticNicSource {
    async fn list_nics(
        &self,
        _guest_id: GuestId,
    ) -> eyre::Result<Vec<model::remote_nic::RemoteNic>> {
        Ok(self.nics.clone())
    }
}

/// Records DNS and netmap calls; optionally fails DNS calls to prove they
/// are best-effort.
#[derive(Default)]
pub struct RecordingSideEffects {
    pub events: Mutex<Vec<String>>,
    pub fail_dns: AtomicBool,
}

impl RecordingSideEffects {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingSideEffects::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkSideEffects for RecordingSideEffects {
    async fn dns_add(&self, fqdn: &str, ip: Ipv4Addr) -> eyre::Result<()> {
        if self.fail_dns.load(Ordering::SeqCst) {
            eyre::bail!("dns backend down");
        }
        self.events.lock().unwrap().push(format!("dns_add {fqdn} {ip}"));
        Ok(())
    }

    async fn dns_remove(&self, fqdn: &str, ip: Ipv4Addr) -> eyre::Result<()> {
        if self.fail_dns.load(Ordering::SeqCst) {
            eyre::bail!("dns backend down");
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("dns_remove {fqdn} {ip}"));
        Ok(())
    }

    async fn netmap_update(
        &self,
        guest_id: GuestId,
        ip: Ipv4Addr,
        removed: bool,
    ) -> eyre::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("netmap {guest_id} {ip} removed={removed}"));
        Ok(())
    }
}

/// A network fixture for engine tests: stepdown policy, available, no
/// release grace window.
pub fn network(name: &str, start: &str, end: &str) -> Network {
    use model::network::{AllocPolicy, NetworkStatus, ServerType};
    use stratus_network::range::AddressRange;
    use stratus_uuid::network::WireId;

    Network {
        id: NetworkId::new_random(),
        name: name.to_string(),
        wire_id: WireId::new_random(),
        range: AddressRange::new(start.parse().unwrap(), end.parse().unwrap()).unwrap(),
        mask: 24,
        gateway: Some("10.0.0.1".parse().unwrap()),
        dns: None,
        domain: None,
        vlan_id: 1,
        server_type: ServerType::Guest,
        alloc_policy: AllocPolicy::Stepdown,
        alloc_timeout_seconds: 0,
        status: NetworkStatus::Available,
        external_id: None,
    }
}

/// A manager over fresh in-memory stores with default options.
pub fn manager(store: &Arc<InMemoryStore>) -> GuestNicManager {
    manager_with_options(store, Options::default())
}

pub fn manager_with_options(store: &Arc<InMemoryStore>, options: Options) -> GuestNicManager {
    GuestNicManager::new(
        store.clone(),
        store.clone(),
        store.clone(),
        RecordingSideEffects::new(),
        options,
    )
    .expect("default options are valid")
}
