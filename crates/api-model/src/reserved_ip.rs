/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use stratus_uuid::network::{NetworkId, ReservedIpId};

/// A row that blocks ordinary allocation of one address on one network and
/// lets a privileged `reserved = true` allocation claim it. `(network_id,
/// ip_addr)` is unique among active rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedIp {
    pub id: ReservedIpId,
    pub network_id: NetworkId,
    pub ip_addr: Ipv4Addr,
    pub notes: String,
    /// None means the reservation never expires on its own.
    pub expired_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ReservedIp {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.expired_at.is_none_or(|at| at > now)
    }
}

impl<'r> FromRow<'r, PgRow> for ReservedIp {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let ip_addr = match row.try_get::<IpAddr, _>("ip_addr")? {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => {
                return Err(sqlx::Error::ColumnDecode {
                    index: "ip_addr".to_string(),
                    source: format!("expected an IPv4 address, got {v6}").into(),
                });
            }
        };
        Ok(ReservedIp {
            id: row.try_get("id")?,
            network_id: row.try_get("network_id")?,
            ip_addr,
            notes: row.try_get("notes")?,
            expired_at: row.try_get("expired_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn reservation() -> ReservedIp {
        ReservedIp {
            id: ReservedIpId::new_random(),
            network_id: NetworkId::new_random(),
            ip_addr: "10.0.0.10".parse().unwrap(),
            notes: "for-db".to_string(),
            expired_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_is_active() {
        let now = Utc::now();
        let mut rip = reservation();
        assert!(rip.is_active(now));

        rip.expired_at = Some(now + Duration::minutes(5));
        assert!(rip.is_active(now));

        rip.expired_at = Some(now - Duration::seconds(1));
        assert!(!rip.is_active(now));

        rip.expired_at = None;
        rip.deleted_at = Some(now);
        assert!(!rip.is_active(now));
    }
}
