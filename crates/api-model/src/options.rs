/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use serde::{Deserialize, Serialize};

/// Global service options consumed by the IPAM core. Loaded from the service
/// config file with environment overrides; see `db::config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Default NIC bandwidth in Mbps when neither the NIC nor its wire
    /// carries a limit.
    pub default_bandwidth: i32,

    /// The 2-byte prefix of generated MAC addresses, colon-separated hex.
    pub global_mac_prefix: String,

    /// Global DNS defaults applied when a network has none of its own.
    pub dns_server: Option<String>,
    pub dns_domain: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            default_bandwidth: 1000,
            global_mac_prefix: "00:22".to_string(),
            dns_server: None,
            dns_domain: None,
        }
    }
}
