/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Reconciling a guest's local NIC rows against the NIC list an upstream
//! cloud reports for it. The remote list is authoritative; the plan is a set
//! of removes followed by adds, with address handoffs routed through the
//! reserved pool so a swap can never lose an address to a third party.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

use stratus_uuid::guest::GuestId;
use stratus_uuid::network::NetworkId;

use model::guest_network::{GuestNetwork, NicConfig};
use model::network::Network;
use model::remote_nic::RemoteNic;

use crate::attach::GuestNicManager;
use crate::{DatabaseError, DatabaseResult};

/// The outcome of one sync pass. Per-NIC failures are collected rather than
/// aborting the pass, so one bad NIC can't wedge the rest of the guest.
#[derive(Debug, Default)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub add_errors: Vec<DatabaseError>,
    pub update_errors: Vec<DatabaseError>,
    pub delete_errors: Vec<DatabaseError>,
}

impl SyncResult {
    pub fn has_errors(&self) -> bool {
        !self.add_errors.is_empty()
            || !self.update_errors.is_empty()
            || !self.delete_errors.is_empty()
    }

    /// True when the pass changed nothing and hit no errors, i.e. local
    /// state already matched the cloud.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0 && !self.has_errors()
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added {}, updated {}, removed {}, errors {}",
            self.added,
            self.updated,
            self.removed,
            self.add_errors.len() + self.update_errors.len() + self.delete_errors.len()
        )
    }
}

struct RemoveOp {
    row: GuestNetwork,
    reserve: bool,
    paired: bool,
}

struct AddOp {
    remote: RemoteNic,
    network: Network,
    reserve: bool,
    paired: bool,
    index: i32,
}

impl GuestNicManager {
    /// Reconcile the guest's NICs against `remote`, the provider-ordered NIC
    /// list from the upstream cloud. Holds the guest mutex for the whole
    /// pass, so it serializes against direct attach and detach.
    pub async fn sync_guest_nics(
        &self,
        guest_id: GuestId,
        remote: &[RemoteNic],
    ) -> DatabaseResult<SyncResult> {
        let _guest_guard = self.guest_locks.lock(guest_id).await;

        let local = self.guest_nics().list_for_guest(guest_id).await?;
        let (removes, adds, mut result) = self.plan_sync(&local, remote).await;

        for op in &removes {
            match self.detach_locked(&op.row, op.reserve).await {
                Ok(()) => {
                    if !op.paired {
                        result.removed += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(%guest_id, mac_addr = %op.row.mac_addr, error = %err, "NIC remove failed");
                    result.delete_errors.push(err);
                }
            }
        }

        for op in adds {
            let errors = if op.paired {
                &mut result.update_errors
            } else {
                &mut result.add_errors
            };

            // A live row elsewhere may still hold the address the cloud now
            // assigns here (a stale owner the cloud has moved on from).
            if let Some(ip) = op.remote.ip {
                match self.guest_nics().find_by_ip(op.network.id, ip).await {
                    Ok(Some(stale)) => {
                        if let Err(err) = self.detach_locked(&stale, false).await {
                            errors.push(err);
                            continue;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        errors.push(err);
                        continue;
                    }
                }
            }

            let config = NicConfig {
                address: op.remote.ip,
                mac: Some(op.remote.mac),
                driver: op.remote.driver.clone(),
                reserved: op.reserve,
                require_designated_ip: op.remote.ip.is_some(),
                index: op.index,
                ignore_network_status: true,
                ..NicConfig::default()
            };
            match self.attach_locked(guest_id, &op.network, config).await {
                Ok(_) => {
                    if op.paired {
                        result.updated += 1;
                    } else {
                        result.added += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(%guest_id, mac_addr = %op.remote.mac, error = %err, "NIC add failed");
                    errors.push(err);
                }
            }
        }

        if !result.is_noop() {
            tracing::info!(%guest_id, %result, "synced guest NICs");
        }
        Ok(result)
    }

    /// Fetch the guest's NIC list from a provider driver and reconcile
    /// against it.
    pub async fn sync_guest_from_source(
        &self,
        guest_id: GuestId,
        source: &dyn crate::stores::CloudNicSource,
    ) -> DatabaseResult<SyncResult> {
        let remote = source
            .list_nics(guest_id)
            .await
            .map_err(|e| DatabaseError::internal(format!("provider NIC listing failed: {e}")))?;
        self.sync_guest_nics(guest_id, &remote).await
    }

    /// Build the remove and add lists by walking both NIC lists in parallel
    /// position order. Paired positions whose row survives untouched produce
    /// no ops; changed positions produce a remove and an add that count as
    /// one update.
    async fn plan_sync(
        &self,
        local: &[GuestNetwork],
        remote: &[RemoteNic],
    ) -> (Vec<RemoveOp>, Vec<AddOp>, SyncResult) {
        let mut result = SyncResult::default();
        let mut removes = Vec::new();
        let mut adds = Vec::new();

        // Resolve each remote NIC's network once; unresolvable networks take
        // their position out of the plan with an error.
        let mut cache: HashMap<String, Option<Network>> = HashMap::new();
        let mut resolved: Vec<Option<Network>> = Vec::with_capacity(remote.len());
        for (position, nic) in remote.iter().enumerate() {
            let network = match cache.get(&nic.external_net_id) {
                Some(hit) => hit.clone(),
                None => {
                    let looked_up = match self
                        .networks()
                        .find_by_external_id(&nic.external_net_id)
                        .await
                    {
                        Ok(found) => found,
                        Err(err) => {
                            record_resolve_error(&mut result, position, local.len(), err);
                            resolved.push(None);
                            continue;
                        }
                    };
                    cache.insert(nic.external_net_id.clone(), looked_up.clone());
                    looked_up
                }
            };
            if network.is_none() {
                record_resolve_error(
                    &mut result,
                    position,
                    local.len(),
                    DatabaseError::not_found("network", &nic.external_net_id),
                );
            }
            resolved.push(network);
        }

        // Every (network, ip) the cloud still claims somewhere. A removed
        // row whose address the cloud reuses is reserved rather than freed.
        let remote_claims: HashSet<(NetworkId, Ipv4Addr)> = remote
            .iter()
            .zip(&resolved)
            .filter_map(|(nic, network)| {
                Some((network.as_ref()?.id, nic.ip?))
            })
            .collect();

        for position in 0..local.len().max(remote.len()) {
            match (local.get(position), remote.get(position)) {
                (Some(row), Some(nic)) => {
                    let Some(network) = resolved[position].as_ref() else {
                        continue; // error already recorded
                    };
                    let unchanged = row.network_id == network.id
                        && row.mac_addr == nic.mac
                        // An empty remote address means the VM is off, not
                        // that the address went away.
                        && (nic.ip.is_none() || row.ip_addr == nic.ip);
                    if unchanged {
                        continue;
                    }
                    let reserve = row
                        .ip_addr
                        .is_some_and(|ip| remote_claims.contains(&(row.network_id, ip)));
                    removes.push(RemoveOp {
                        row: row.clone(),
                        reserve,
                        paired: true,
                    });
                    adds.push(AddOp {
                        remote: nic.clone(),
                        network: network.clone(),
                        reserve: false, // filled in below
                        paired: true,
                        index: i32::from(row.index),
                    });
                }
                (Some(row), None) => {
                    removes.push(RemoveOp {
                        row: row.clone(),
                        reserve: false,
                        paired: false,
                    });
                }
                (None, Some(nic)) => {
                    let Some(network) = resolved[position].as_ref() else {
                        continue;
                    };
                    adds.push(AddOp {
                        remote: nic.clone(),
                        network: network.clone(),
                        reserve: false,
                        paired: false,
                        index: -1,
                    });
                }
                (None, None) => unreachable!(),
            }
        }

        // Adds whose target address is being parked by one of this pass's
        // removes claim it back out of the reserved pool.
        let parked: HashSet<(NetworkId, Ipv4Addr)> = removes
            .iter()
            .filter(|op| op.reserve)
            .filter_map(|op| Some((op.row.network_id, op.row.ip_addr?)))
            .collect();
        for op in &mut adds {
            if let Some(ip) = op.remote.ip {
                if parked.contains(&(op.network.id, ip)) {
                    op.reserve = true;
                }
            }
        }

        (removes, adds, result)
    }
}

fn record_resolve_error(
    result: &mut SyncResult,
    position: usize,
    local_len: usize,
    err: DatabaseError,
) {
    tracing::warn!(position, error = %err, "cannot resolve remote NIC network");
    if position < local_len {
        result.update_errors.push(err);
    } else {
        result.add_errors.push(err);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mac_address::MacAddress;

    use model::guest_network::NicConfig;

    use crate::testing::{self, InMemoryStore};

    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    fn remote(mac_addr: &str, addr: Option<&str>, net: &Network) -> RemoteNic {
        RemoteNic {
            mac: mac(mac_addr),
            ip: addr.map(|a| a.parse().unwrap()),
            driver: None,
            external_net_id: net.external_id.clone().unwrap(),
        }
    }

    fn external_network() -> Network {
        let mut net = testing::network("prod", "10.0.0.10", "10.0.0.100");
        net.external_id = Some("ext-prod".to_string());
        net
    }

    async fn seeded(
        store: &Arc<InMemoryStore>,
        net: &Network,
        guest: GuestId,
        nics: &[(&str, &str)],
    ) -> crate::GuestNicManager {
        let mgr = testing::manager(store);
        for (mac_addr, addr) in nics {
            let config = NicConfig {
                address: Some(addr.parse().unwrap()),
                mac: Some(mac(mac_addr)),
                require_designated_ip: true,
                ..NicConfig::default()
            };
            mgr.attach_network(guest, net, config).await.unwrap();
        }
        mgr
    }

    #[tokio::test]
    async fn test_sync_in_sync_is_noop() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let mgr = seeded(&store, &net, guest, &[("00:22:00:00:00:01", "10.0.0.20")]).await;

        let remote_nics = vec![remote("00:22:00:00:00:01", Some("10.0.0.20"), &net)];
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        assert!(result.is_noop(), "{result}");

        // Running it again stays a noop.
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        assert!(result.is_noop());
        assert_eq!(store.live_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_adds_missing_nic() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let mgr = seeded(&store, &net, guest, &[("00:22:00:00:00:01", "10.0.0.20")]).await;

        let remote_nics = vec![
            remote("00:22:00:00:00:01", Some("10.0.0.20"), &net),
            remote("00:22:00:00:00:02", Some("10.0.0.21"), &net),
        ];
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        assert_eq!(result.added, 1);
        assert_eq!(result.updated, 0);
        assert!(!result.has_errors());

        let rows = store.live_rows();
        assert_eq!(rows.len(), 2);
        let added = rows
            .iter()
            .find(|row| row.mac_addr == mac("00:22:00:00:00:02"))
            .unwrap();
        assert_eq!(added.ip_addr, Some(ip("10.0.0.21")));
        assert_eq!(added.index, 1);
    }

    #[tokio::test]
    async fn test_sync_removes_stale_nic() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let mgr = seeded(
            &store,
            &net,
            guest,
            &[
                ("00:22:00:00:00:01", "10.0.0.20"),
                ("00:22:00:00:00:02", "10.0.0.21"),
            ],
        )
        .await;

        let remote_nics = vec![remote("00:22:00:00:00:01", Some("10.0.0.20"), &net)];
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        assert_eq!(result.removed, 1);
        assert!(!result.has_errors());
        let rows = store.live_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mac_addr, mac("00:22:00:00:00:01"));
        // A plain removal frees the address instead of parking it.
        assert!(store.active_reservations(net.id).is_empty());
    }

    #[tokio::test]
    async fn test_sync_mac_change_keeps_address() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let mgr = seeded(&store, &net, guest, &[("00:22:00:00:00:01", "10.0.0.20")]).await;

        let remote_nics = vec![remote("00:22:00:00:00:aa", Some("10.0.0.20"), &net)];
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(result.added, 0);
        assert_eq!(result.removed, 0);
        assert!(!result.has_errors(), "{:?}", result);

        let rows = store.live_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mac_addr, mac("00:22:00:00:00:aa"));
        assert_eq!(rows[0].ip_addr, Some(ip("10.0.0.20")));
        assert_eq!(rows[0].index, 0);
        // The handoff reservation was consumed, not leaked.
        assert!(store.active_reservations(net.id).is_empty());
    }

    #[tokio::test]
    async fn test_sync_swaps_addresses_between_nics() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let mgr = seeded(
            &store,
            &net,
            guest,
            &[
                ("00:22:00:00:00:01", "10.0.0.20"),
                ("00:22:00:00:00:02", "10.0.0.21"),
            ],
        )
        .await;

        // The cloud swapped the two addresses. Both handoffs must route
        // through the reserved pool so nothing else can steal them.
        let remote_nics = vec![
            remote("00:22:00:00:00:01", Some("10.0.0.21"), &net),
            remote("00:22:00:00:00:02", Some("10.0.0.20"), &net),
        ];
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        assert_eq!(result.updated, 2);
        assert!(!result.has_errors(), "{:?}", result);

        let rows = mgr.guest_nics().list_for_guest(guest).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].mac_addr, mac("00:22:00:00:00:01"));
        assert_eq!(rows[0].ip_addr, Some(ip("10.0.0.21")));
        assert_eq!(rows[1].mac_addr, mac("00:22:00:00:00:02"));
        assert_eq!(rows[1].ip_addr, Some(ip("10.0.0.20")));
        assert!(store.active_reservations(net.id).is_empty());
    }

    #[tokio::test]
    async fn test_sync_empty_remote_address_is_not_a_change() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let mgr = seeded(&store, &net, guest, &[("00:22:00:00:00:01", "10.0.0.20")]).await;

        // The VM is powered off, so the cloud reports no address.
        let remote_nics = vec![remote("00:22:00:00:00:01", None, &net)];
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        assert!(result.is_noop());
        assert_eq!(store.live_rows()[0].ip_addr, Some(ip("10.0.0.20")));
    }

    #[tokio::test]
    async fn test_sync_unknown_network_is_isolated() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let mgr = seeded(&store, &net, guest, &[("00:22:00:00:00:01", "10.0.0.20")]).await;

        let mut unknown = remote("00:22:00:00:00:02", Some("10.9.0.5"), &net);
        unknown.external_net_id = "ext-missing".to_string();
        let remote_nics = vec![
            remote("00:22:00:00:00:01", Some("10.0.0.20"), &net),
            unknown,
            remote("00:22:00:00:00:03", Some("10.0.0.30"), &net),
        ];
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        // The bad NIC errors out; the good one is still added.
        assert_eq!(result.add_errors.len(), 1);
        assert!(matches!(
            result.add_errors[0],
            DatabaseError::NotFound { .. }
        ));
        assert_eq!(result.added, 1);
        assert_eq!(store.live_rows().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_from_provider_source() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let mgr = testing::manager(&store);

        let source = testing::StaticNicSource {
            nics: vec![remote("00:22:00:00:00:01", Some("10.0.0.20"), &net)],
        };
        let result = mgr.sync_guest_from_source(guest, &source).await.unwrap();
        assert_eq!(result.added, 1);
        let result = mgr.sync_guest_from_source(guest, &source).await.unwrap();
        assert!(result.is_noop());
    }

    #[tokio::test]
    async fn test_sync_takes_address_from_stale_owner() {
        let store = InMemoryStore::new();
        let net = external_network();
        store.add_network(net.clone());
        let guest = GuestId::new_random();
        let other_guest = GuestId::new_random();
        let mgr = seeded(&store, &net, other_guest, &[("00:22:00:00:00:99", "10.0.0.30")]).await;

        // The cloud says this guest now owns .30; the old local owner must
        // give it up.
        let remote_nics = vec![remote("00:22:00:00:00:01", Some("10.0.0.30"), &net)];
        let result = mgr.sync_guest_nics(guest, &remote_nics).await.unwrap();
        assert_eq!(result.added, 1);
        assert!(!result.has_errors(), "{:?}", result);

        let rows = store.live_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].guest_id, guest);
        assert_eq!(rows[0].ip_addr, Some(ip("10.0.0.30")));
    }
}
