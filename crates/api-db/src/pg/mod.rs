/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Postgres-backed stores. The query functions take a bare connection so
//! callers can compose them into transactions; [`PgStores`] wraps a pool and
//! implements the store traits on top of them.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use mac_address::MacAddress;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use stratus_uuid::guest::{GuestId, GuestNetworkId};
use stratus_uuid::network::{NetworkId, ReservedIpId};

use model::guest_network::{GuestNetwork, NewGuestNetwork};
use model::network::Network;
use model::reserved_ip::ReservedIp;

use crate::stores::{
    AddressClaimant, GuestNetworkStore, MacClaimant, NetworkStore, ReservedIpStore,
};
use crate::{DatabaseError, DatabaseResult};

pub mod guest_network;
pub mod network;
pub mod reserved_ip;

#[derive(Clone)]
pub struct PgStores {
    pool: PgPool,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        PgStores { pool }
    }

    async fn conn(&self) -> DatabaseResult<PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::internal(format!("failed to acquire connection: {e}")))
    }
}

#[async_trait]
impl NetworkStore for PgStores {
    async fn find(&self, id: NetworkId) -> DatabaseResult<Option<Network>> {
        let mut conn = self.conn().await?;
        network::find(&mut conn, id).await
    }

    async fn find_by_external_id(&self, external_id: &str) -> DatabaseResult<Option<Network>> {
        let mut conn = self.conn().await?;
        network::find_by_external_id(&mut conn, external_id).await
    }
}

#[async_trait]
impl GuestNetworkStore for PgStores {
    async fn list_for_guest(&self, guest_id: GuestId) -> DatabaseResult<Vec<GuestNetwork>> {
        let mut conn = self.conn().await?;
        guest_network::list_for_guest(&mut conn, guest_id).await
    }

    async fn find_by_ip(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> DatabaseResult<Option<GuestNetwork>> {
        let mut conn = self.conn().await?;
        guest_network::find_by_ip(&mut conn, network_id, ip).await
    }

    async fn insert(&self, row: NewGuestNetwork) -> DatabaseResult<GuestNetwork> {
        let mut conn = self.conn().await?;
        guest_network::insert(&mut conn, row).await
    }

    async fn delete(&self, row_id: GuestNetworkId) -> DatabaseResult<()> {
        let mut conn = self.conn().await?;
        guest_network::delete(&mut conn, row_id).await
    }

    async fn recently_released(
        &self,
        network_id: NetworkId,
        within: Duration,
    ) -> DatabaseResult<HashSet<Ipv4Addr>> {
        let mut conn = self.conn().await?;
        guest_network::recently_released(&mut conn, network_id, within).await
    }

    async fn used_ifnames(&self, network_id: NetworkId) -> DatabaseResult<HashSet<String>> {
        let mut conn = self.conn().await?;
        guest_network::used_ifnames(&mut conn, network_id).await
    }

    async fn list_ips_on_network(
        &self,
        network_id: NetworkId,
    ) -> DatabaseResult<HashSet<Ipv4Addr>> {
        let mut conn = self.conn().await?;
        guest_network::list_ips_on_network(&mut conn, network_id).await
    }

    async fn mac_in_use(&self, mac: MacAddress) -> DatabaseResult<bool> {
        let mut conn = self.conn().await?;
        guest_network::mac_in_use(&mut conn, mac).await
    }
}

#[async_trait]
impl ReservedIpStore for PgStores {
    async fn reserve(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
        notes: &str,
        valid_for: Option<Duration>,
    ) -> DatabaseResult<ReservedIp> {
        let mut conn = self.conn().await?;
        reserved_ip::reserve(&mut conn, network_id, ip, notes, valid_for).await
    }

    async fn get_active(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> DatabaseResult<Option<ReservedIp>> {
        let mut conn = self.conn().await?;
        reserved_ip::get_active(&mut conn, network_id, ip).await
    }

    async fn consume(&self, id: ReservedIpId) -> DatabaseResult<()> {
        let mut conn = self.conn().await?;
        reserved_ip::consume(&mut conn, id).await
    }

    async fn release(&self, network_id: NetworkId, ip: Ipv4Addr) -> DatabaseResult<()> {
        let mut conn = self.conn().await?;
        reserved_ip::release(&mut conn, network_id, ip).await
    }

    async fn list_active(&self, network_id: NetworkId) -> DatabaseResult<Vec<ReservedIp>> {
        let mut conn = self.conn().await?;
        reserved_ip::list_active(&mut conn, network_id).await
    }

    async fn purge_expired(&self) -> DatabaseResult<u64> {
        let mut conn = self.conn().await?;
        reserved_ip::purge_expired(&mut conn).await
    }
}

/// An address claimant over one auxiliary table. All of them share the
/// `(network_id, ip_addr, deleted)` shape.
pub struct TableAddressClaimant {
    pool: PgPool,
    table: &'static str,
}

#[async_trait]
impl AddressClaimant for TableAddressClaimant {
    fn name(&self) -> &'static str {
        self.table
    }

    async fn list_ips_on_network(
        &self,
        network_id: NetworkId,
    ) -> DatabaseResult<HashSet<Ipv4Addr>> {
        let query = format!(
            "SELECT ip_addr FROM {} WHERE network_id = $1 AND deleted = false AND ip_addr IS NOT NULL",
            self.table
        );
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::internal(format!("failed to acquire connection: {e}")))?;
        let rows: Vec<(IpAddr,)> = sqlx::query_as(&query)
            .bind(network_id)
            .fetch_all(conn.as_mut())
            .await
            .map_err(|e| DatabaseError::query(&query, e))?;
        Ok(rows
            .into_iter()
            .filter_map(|(ip,)| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect())
    }
}

/// Every table besides guestnetworks whose rows pin addresses on a network.
pub fn default_address_claimants(pool: &PgPool) -> Vec<Arc<dyn AddressClaimant>> {
    [
        "groupnetworks",
        "hostnetworks",
        "loadbalancernetworks",
        "dbinstancenetworks",
        "networkinterfacenetworks",
        "elasticips",
    ]
    .into_iter()
    .map(|table| {
        Arc::new(TableAddressClaimant {
            pool: pool.clone(),
            table,
        }) as Arc<dyn AddressClaimant>
    })
    .collect()
}

/// Tap service NICs hold MACs outside guestnetworks.
pub struct TapServiceMacClaimant {
    pool: PgPool,
}

impl TapServiceMacClaimant {
    pub fn new(pool: PgPool) -> Self {
        TapServiceMacClaimant { pool }
    }
}

#[async_trait]
impl MacClaimant for TapServiceMacClaimant {
    fn name(&self) -> &'static str {
        "tapservices"
    }

    async fn mac_in_use(&self, mac: MacAddress) -> DatabaseResult<bool> {
        let query =
            "SELECT EXISTS (SELECT 1 FROM tapservices WHERE mac_addr = $1 AND deleted = false)";
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::internal(format!("failed to acquire connection: {e}")))?;
        let (exists,): (bool,) = sqlx::query_as(query)
            .bind(mac)
            .fetch_one(conn.as_mut())
            .await
            .map_err(|e| DatabaseError::query(query, e))?;
        Ok(exists)
    }
}
