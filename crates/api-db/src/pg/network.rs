/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use sqlx::PgConnection;
use stratus_uuid::network::NetworkId;

use model::network::{Network, NetworkStatus};

use crate::{DatabaseError, DatabaseResult};

const CONST_UQ_NAME: &str = "uq_networks_name";

const NETWORK_COLUMNS: &str = "id, name, wire_id, guest_ip_start, guest_ip_end, guest_ip_mask, \
     guest_gateway, guest_dns, guest_domain, vlan_id, server_type, alloc_policy, \
     alloc_timeout_seconds, status, external_id";

pub async fn find(conn: &mut PgConnection, id: NetworkId) -> DatabaseResult<Option<Network>> {
    let query = format!("SELECT {NETWORK_COLUMNS} FROM networks WHERE id = $1 AND deleted = false");
    sqlx::query_as(&query)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| DatabaseError::query(&query, e))
}

pub async fn find_by_external_id(
    conn: &mut PgConnection,
    external_id: &str,
) -> DatabaseResult<Option<Network>> {
    let query = format!(
        "SELECT {NETWORK_COLUMNS} FROM networks WHERE external_id = $1 AND deleted = false"
    );
    sqlx::query_as(&query)
        .bind(external_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| DatabaseError::query(&query, e))
}

/// Create a network after validating it and checking that its range does not
/// overlap any other live network's range.
pub async fn create(conn: &mut PgConnection, network: &Network) -> DatabaseResult<()> {
    network.validate()?;
    check_vpc_bounds(&mut *conn, network).await?;
    check_overlap(&mut *conn, network).await?;

    let query = "INSERT INTO networks (id, name, wire_id, guest_ip_start, guest_ip_end, \
         guest_ip_mask, guest_gateway, guest_dns, guest_domain, vlan_id, server_type, \
         alloc_policy, alloc_timeout_seconds, status, external_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)";
    sqlx::query(query)
        .bind(network.id)
        .bind(&network.name)
        .bind(network.wire_id)
        .bind(IpAddr::V4(network.range.start()))
        .bind(IpAddr::V4(network.range.end()))
        .bind(i16::from(network.mask))
        .bind(network.gateway.map(IpAddr::V4))
        .bind(&network.dns)
        .bind(&network.domain)
        .bind(network.vlan_id)
        .bind(network.server_type.to_string())
        .bind(network.alloc_policy.to_string())
        .bind(network.alloc_timeout_seconds)
        .bind(network.status.to_string())
        .bind(&network.external_id)
        .execute(conn)
        .await
        .map_err(|e| {
            if e.as_database_error().and_then(|db| db.constraint()) == Some(CONST_UQ_NAME) {
                DatabaseError::Conflict(format!("network name {:?} is taken", network.name))
            } else {
                DatabaseError::query(query, e)
            }
        })?;
    Ok(())
}

/// Update a network's range and mask. Refused for networks managed by an
/// upstream cloud, and refused when any live NIC would fall outside the new
/// range.
pub async fn update_range(conn: &mut PgConnection, network: &Network) -> DatabaseResult<()> {
    network.validate()?;

    let current = find(&mut *conn, network.id)
        .await?
        .ok_or_else(|| DatabaseError::not_found("network", network.id))?;
    if current.external_id.is_some() {
        return Err(DatabaseError::Conflict(format!(
            "network {} is managed by an upstream cloud",
            network.id
        )));
    }

    check_vpc_bounds(&mut *conn, network).await?;
    check_overlap(&mut *conn, network).await?;

    let query = "SELECT EXISTS (SELECT 1 FROM guestnetworks WHERE network_id = $1 \
         AND deleted = false AND ip_addr IS NOT NULL AND (ip_addr < $2 OR ip_addr > $3))";
    let (orphaned,): (bool,) = sqlx::query_as(query)
        .bind(network.id)
        .bind(IpAddr::V4(network.range.start()))
        .bind(IpAddr::V4(network.range.end()))
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    if orphaned {
        return Err(DatabaseError::Conflict(format!(
            "live NICs on network {} fall outside the new range {}",
            network.id, network.range
        )));
    }

    let query = "UPDATE networks SET guest_ip_start = $2, guest_ip_end = $3, guest_ip_mask = $4 \
         WHERE id = $1 AND deleted = false";
    sqlx::query(query)
        .bind(network.id)
        .bind(IpAddr::V4(network.range.start()))
        .bind(IpAddr::V4(network.range.end()))
        .bind(i16::from(network.mask))
        .execute(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    Ok(())
}

pub async fn set_status(
    conn: &mut PgConnection,
    id: NetworkId,
    status: NetworkStatus,
) -> DatabaseResult<()> {
    let query = "UPDATE networks SET status = $2 WHERE id = $1 AND deleted = false";
    let result = sqlx::query(query)
        .bind(id)
        .bind(status.to_string())
        .execute(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("network", id));
    }
    Ok(())
}

/// Soft-delete a network. Refused while any live NIC or active reservation
/// still references it.
pub async fn delete(conn: &mut PgConnection, id: NetworkId) -> DatabaseResult<()> {
    let query = "SELECT EXISTS (SELECT 1 FROM guestnetworks WHERE network_id = $1 AND deleted = false) \
         OR EXISTS (SELECT 1 FROM reservedips WHERE network_id = $1 AND deleted_at IS NULL \
         AND (expired_at IS NULL OR expired_at > now()))";
    let (in_use,): (bool,) = sqlx::query_as(query)
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    if in_use {
        return Err(DatabaseError::NetworkInUse { network_id: id });
    }

    let query = "UPDATE networks SET deleted = true, status = $2 WHERE id = $1 AND deleted = false";
    let result = sqlx::query(query)
        .bind(id)
        .bind(NetworkStatus::Deleted.to_string())
        .execute(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("network", id));
    }
    Ok(())
}

/// The whole range must sit inside the CIDR of the VPC the network's wire
/// belongs to.
async fn check_vpc_bounds(conn: &mut PgConnection, network: &Network) -> DatabaseResult<()> {
    let query = "SELECT v.cidr FROM wires w JOIN vpcs v ON v.id = w.vpc_id \
         WHERE w.id = $1 AND w.deleted = false AND v.deleted = false";
    let cidr: Option<(IpNetwork,)> = sqlx::query_as(query)
        .bind(network.wire_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    let Some((cidr,)) = cidr else {
        return Err(DatabaseError::not_found("wire", network.wire_id));
    };
    let IpNetwork::V4(cidr) = cidr else {
        return Ok(()); // v6 VPCs don't constrain the v4 guest range
    };
    if !cidr.contains(network.range.start()) || !cidr.contains(network.range.end()) {
        return Err(DatabaseError::RangeOutsideVpc {
            range: network.range,
            cidr,
        });
    }
    Ok(())
}

async fn check_overlap(conn: &mut PgConnection, network: &Network) -> DatabaseResult<()> {
    let query = "SELECT id FROM networks WHERE deleted = false AND id <> $1 \
         AND guest_ip_start <= $3 AND $2 <= guest_ip_end LIMIT 1";
    let other: Option<(NetworkId,)> = sqlx::query_as(query)
        .bind(network.id)
        .bind(IpAddr::V4(network.range.start()))
        .bind(IpAddr::V4(network.range.end()))
        .fetch_optional(conn)
        .await
        .map_err(|e| DatabaseError::query(query, e))?;
    if let Some((other,)) = other {
        return Err(DatabaseError::OverlappingNetwork {
            range: network.range,
            other,
        });
    }
    Ok(())
}
