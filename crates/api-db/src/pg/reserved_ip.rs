/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::{IpAddr, Ipv4Addr};

use chrono::{Duration, Utc};
use sqlx::PgConnection;
use stratus_uuid::network::{NetworkId, ReservedIpId};

use model::reserved_ip::ReservedIp;

use crate::{DatabaseError, DatabaseResult};

const CONST_UQ_NETWORK_IP: &str = "uq_reservedips_network_ip";

const ACTIVE: &str = "deleted_at IS NULL AND (expired_at IS NULL OR expired_at > now())";

pub async fn reserve(
    conn: &mut PgConnection,
    network_id: NetworkId,
    ip: Ipv4Addr,
    notes: &str,
    valid_for: Option<Duration>,
) -> DatabaseResult<ReservedIp> {
    let query = "INSERT INTO reservedips (id, network_id, ip_addr, notes, expired_at) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *";
    sqlx::query_as(query)
        .bind(ReservedIpId::new_random())
        .bind(network_id)
        .bind(IpAddr::V4(ip))
        .bind(notes)
        .bind(valid_for.map(|d| Utc::now() + d))
        .fetch_one(conn)
        .await
        .map_err(|e| {
            if e.as_database_error().and_then(|db| db.constraint()) == Some(CONST_UQ_NETWORK_IP) {
                DatabaseError::Conflict(format!(
                    "address {ip} is already reserved on network {network_id}"
                ))
            } else {
                DatabaseError::query(query, e)
            }
        })
}

pub async fn get_active(
    conn: &mut PgConnection,
    network_id: NetworkId,
    ip: Ipv4Addr,
) -> DatabaseResult<Option<ReservedIp>> {
    let query = format!(
        "SELECT * FROM reservedips WHERE network_id = $1 AND ip_addr = $2 AND {ACTIVE}"
    );
    sqlx::query_as(&query)
        .bind(network_id)
        .bind(IpAddr::V4(ip))
        .fetch_optional(conn)
        .await
        .map_err(|e| DatabaseError::query(&query, e))
}

pub async fn consume(conn: &mut PgConnection, id: ReservedIpId) -> DatabaseResult<()> {
    let query = "UPDATE reservedips SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL";
    let result = sqlx::query(query)
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("reserved IP", id));
    }
    Ok(())
}

pub async fn release(
    conn: &mut PgConnection,
    network_id: NetworkId,
    ip: Ipv4Addr,
) -> DatabaseResult<()> {
    let query = format!(
        "UPDATE reservedips SET deleted_at = now() \
         WHERE network_id = $1 AND ip_addr = $2 AND {ACTIVE}"
    );
    let result = sqlx::query(&query)
        .bind(network_id)
        .bind(IpAddr::V4(ip))
        .execute(conn)
        .await
        .map_err(|e| DatabaseError::query(&query, e))?;
    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("reserved IP", ip));
    }
    Ok(())
}

pub async fn list_active(
    conn: &mut PgConnection,
    network_id: NetworkId,
) -> DatabaseResult<Vec<ReservedIp>> {
    let query = format!(
        "SELECT * FROM reservedips WHERE network_id = $1 AND {ACTIVE} ORDER BY ip_addr ASC"
    );
    sqlx::query_as(&query)
        .bind(network_id)
        .fetch_all(conn)
        .await
        .map_err(|e| DatabaseError::query(&query, e))
}

/// Sweep reservations whose expiry has passed. Run periodically; expired
/// rows are already invisible to the active queries, this just closes them
/// out.
pub async fn purge_expired(conn: &mut PgConnection) -> DatabaseResult<u64> {
    let query = "UPDATE reservedips SET deleted_at = now() \
         WHERE deleted_at IS NULL AND expired_at IS NOT NULL AND expired_at <= now()";
    let result = sqlx::query(query)
        .execute(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    Ok(result.rows_affected())
}
