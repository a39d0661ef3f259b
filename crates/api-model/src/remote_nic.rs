/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::Ipv4Addr;

use mac_address::MacAddress;
use serde::{Deserialize, Serialize};

/// One NIC as reported by an upstream cloud for a guest, in the provider's
/// stable interface order. The provider SDK is an opaque producer of these;
/// only the reconciler consumes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNic {
    pub mac: MacAddress,
    /// Clouds report no address while a VM is off; an empty address never
    /// triggers a local reallocation.
    pub ip: Option<Ipv4Addr>,
    pub driver: Option<String>,
    /// The provider-side ID of the network this NIC sits on; resolved to a
    /// local network through the networks store.
    pub external_net_id: String,
}
