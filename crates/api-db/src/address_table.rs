/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Utc;
use stratus_uuid::network::NetworkId;

use crate::stores::{AddressClaimant, GuestNetworkStore, ReservedIpStore};
use crate::DatabaseResult;

/// The set of addresses unavailable for allocation on a network: everything
/// live guest NICs hold, everything the auxiliary claimant tables hold, and
/// every active reservation. Reserved addresses sit in this table so that
/// only the `reserved = true` path can hand them out.
pub async fn build_address_table(
    network_id: NetworkId,
    guest_nics: &dyn GuestNetworkStore,
    claimants: &[Arc<dyn AddressClaimant>],
    reserved_ips: &dyn ReservedIpStore,
) -> DatabaseResult<HashSet<Ipv4Addr>> {
    let mut table = guest_nics.list_ips_on_network(network_id).await?;

    for claimant in claimants {
        let ips = claimant.list_ips_on_network(network_id).await?;
        if !ips.is_empty() {
            tracing::debug!(
                %network_id,
                claimant = claimant.name(),
                count = ips.len(),
                "claimed addresses"
            );
        }
        table.extend(ips);
    }

    let now = Utc::now();
    for reservation in reserved_ips.list_active(network_id).await? {
        if reservation.is_active(now) {
            table.insert(reservation.ip_addr);
        }
    }

    Ok(table)
}
