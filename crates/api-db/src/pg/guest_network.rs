/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use chrono::Duration;
use mac_address::MacAddress;
use sqlx::PgConnection;
use stratus_uuid::guest::{GuestId, GuestNetworkId};
use stratus_uuid::network::NetworkId;

use model::guest_network::{GuestNetwork, NewGuestNetwork};

use crate::{DatabaseError, DatabaseResult};

// Partial unique indexes over live rows; see the initial migration.
const CONST_UQ_MAC: &str = "uq_guestnetworks_mac_addr";
const CONST_UQ_NETWORK_IP: &str = "uq_guestnetworks_network_ip";
const CONST_UQ_GUEST_INDEX: &str = "uq_guestnetworks_guest_index";

pub async fn list_for_guest(
    conn: &mut PgConnection,
    guest_id: GuestId,
) -> DatabaseResult<Vec<GuestNetwork>> {
    let query = "SELECT * FROM guestnetworks WHERE guest_id = $1 AND deleted = false \
         ORDER BY \"index\" ASC";
    sqlx::query_as(query)
        .bind(guest_id)
        .fetch_all(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))
}

pub async fn find_by_ip(
    conn: &mut PgConnection,
    network_id: NetworkId,
    ip: Ipv4Addr,
) -> DatabaseResult<Option<GuestNetwork>> {
    let query =
        "SELECT * FROM guestnetworks WHERE network_id = $1 AND ip_addr = $2 AND deleted = false";
    sqlx::query_as(query)
        .bind(network_id)
        .bind(IpAddr::V4(ip))
        .fetch_optional(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))
}

pub async fn insert(
    conn: &mut PgConnection,
    row: NewGuestNetwork,
) -> DatabaseResult<GuestNetwork> {
    let query = "INSERT INTO guestnetworks (row_id, guest_id, network_id, mac_addr, ip_addr, \
         driver, bw_limit, \"index\", \"virtual\", ifname, team_with) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *";
    sqlx::query_as(query)
        .bind(GuestNetworkId::new_random())
        .bind(row.guest_id)
        .bind(row.network_id)
        .bind(row.mac_addr)
        .bind(row.ip_addr.map(IpAddr::V4))
        .bind(&row.driver)
        .bind(row.bw_limit)
        .bind(row.index)
        .bind(row.is_virtual)
        .bind(&row.ifname)
        .bind(row.team_with)
        .fetch_one(conn)
        .await
        .map_err(|e| match constraint(&e) {
            Some(CONST_UQ_MAC) => DatabaseError::DuplicateMacAddress(row.mac_addr),
            Some(CONST_UQ_NETWORK_IP) => DatabaseError::DuplicateAddress {
                network_id: row.network_id,
                // The ip constraint only fires on rows that carry one.
                ip: row.ip_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
            },
            Some(CONST_UQ_GUEST_INDEX) => DatabaseError::DuplicateNicIndex {
                guest_id: row.guest_id,
                index: row.index,
            },
            _ => DatabaseError::query(query, e),
        })
}

pub async fn delete(conn: &mut PgConnection, row_id: GuestNetworkId) -> DatabaseResult<()> {
    let query = "UPDATE guestnetworks SET deleted = true, deleted_at = now() \
         WHERE row_id = $1 AND deleted = false";
    let result = sqlx::query(query)
        .bind(row_id)
        .execute(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("guest NIC", row_id));
    }
    Ok(())
}

/// Addresses of NICs released within the grace window. Soft-deleted rows are
/// the record of the release, so this is a scan over `deleted = true`.
pub async fn recently_released(
    conn: &mut PgConnection,
    network_id: NetworkId,
    within: Duration,
) -> DatabaseResult<HashSet<Ipv4Addr>> {
    if within <= Duration::zero() {
        return Ok(HashSet::new());
    }
    let query = "SELECT DISTINCT ip_addr FROM guestnetworks WHERE network_id = $1 \
         AND deleted = true AND ip_addr IS NOT NULL \
         AND deleted_at > now() - make_interval(secs => $2)";
    let rows: Vec<(IpAddr,)> = sqlx::query_as(query)
        .bind(network_id)
        .bind(within.num_milliseconds() as f64 / 1000.0)
        .fetch_all(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    Ok(rows.into_iter().filter_map(|(ip,)| v4(ip)).collect())
}

pub async fn used_ifnames(
    conn: &mut PgConnection,
    network_id: NetworkId,
) -> DatabaseResult<HashSet<String>> {
    let query = "SELECT ifname FROM guestnetworks WHERE network_id = $1 AND deleted = false";
    let rows: Vec<(String,)> = sqlx::query_as(query)
        .bind(network_id)
        .fetch_all(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

pub async fn list_ips_on_network(
    conn: &mut PgConnection,
    network_id: NetworkId,
) -> DatabaseResult<HashSet<Ipv4Addr>> {
    let query = "SELECT ip_addr FROM guestnetworks WHERE network_id = $1 AND deleted = false \
         AND ip_addr IS NOT NULL";
    let rows: Vec<(IpAddr,)> = sqlx::query_as(query)
        .bind(network_id)
        .fetch_all(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    Ok(rows.into_iter().filter_map(|(ip,)| v4(ip)).collect())
}

pub async fn mac_in_use(conn: &mut PgConnection, mac: MacAddress) -> DatabaseResult<bool> {
    let query =
        "SELECT EXISTS (SELECT 1 FROM guestnetworks WHERE mac_addr = $1 AND deleted = false)";
    let (exists,): (bool,) = sqlx::query_as(query)
        .bind(mac)
        .fetch_one(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    Ok(exists)
}

fn constraint(e: &sqlx::Error) -> Option<&str> {
    e.as_database_error().and_then(|db| db.constraint())
}

fn v4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    }
}
