/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use mac_address::MacAddress;
use stratus_network::mac::MacPrefix;

use crate::stores::{GuestNetworkStore, MacClaimant};
use crate::{DatabaseError, DatabaseResult};

/// How many MACs we try before giving up. The 4 random bytes make a real
/// collision astronomically unlikely; hitting this means something is
/// feeding us a bad suggestion in a loop.
pub const MAX_TRIES: usize = 10;

/// Pick a MAC no live NIC or claimant table holds. A caller suggestion is
/// tried first and dropped after one attempt; every further try is a fresh
/// random MAC under `prefix`.
///
/// The check here races with concurrent inserts; the unique index on
/// `mac_addr` is the authority, and insert retries on a duplicate.
pub async fn generate_mac(
    guest_nics: &dyn GuestNetworkStore,
    claimants: &[Arc<dyn MacClaimant>],
    suggestion: Option<MacAddress>,
    prefix: MacPrefix,
) -> DatabaseResult<MacAddress> {
    let mut suggestion = suggestion;
    for _ in 0..MAX_TRIES {
        let mac = match suggestion.take() {
            Some(mac) => mac,
            None => prefix.random_mac(),
        };
        if mac_in_use(guest_nics, claimants, mac).await? {
            tracing::debug!(%mac, "generated mac already in use, retrying");
            continue;
        }
        return Ok(mac);
    }
    Err(DatabaseError::TooManyAttempts {
        what: "mac address",
        tries: MAX_TRIES,
    })
}

async fn mac_in_use(
    guest_nics: &dyn GuestNetworkStore,
    claimants: &[Arc<dyn MacClaimant>],
    mac: MacAddress,
) -> DatabaseResult<bool> {
    if guest_nics.mac_in_use(mac).await? {
        return Ok(true);
    }
    for claimant in claimants {
        if claimant.mac_in_use(mac).await? {
            return Ok(true);
        }
    }
    Ok(false)
}
