/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use mac_address::MacAddress;
use rand::RngCore;

#[derive(Debug, thiserror::Error)]
#[error("{0} is not a valid 2-byte mac prefix")]
pub struct InvalidMacPrefix(String);

/// A 2-byte organizationally unique prefix for locally generated MAC
/// addresses, e.g. "00:22". The remaining 4 bytes are randomized per NIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacPrefix([u8; 2]);

impl MacPrefix {
    pub fn parse(input: &str) -> Result<Self, InvalidMacPrefix> {
        let parts: Vec<&str> = input.split(':').collect();
        if parts.len() != 2 {
            return Err(InvalidMacPrefix(input.to_string()));
        }
        let mut bytes = [0u8; 2];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] =
                u8::from_str_radix(part, 16).map_err(|_| InvalidMacPrefix(input.to_string()))?;
        }
        Ok(MacPrefix(bytes))
    }

    /// Compose a MAC from this prefix and 4 random bytes.
    pub fn random_mac(&self) -> MacAddress {
        let mut tail = [0u8; 4];
        rand::rng().fill_bytes(&mut tail);
        MacAddress::new([self.0[0], self.0[1], tail[0], tail[1], tail[2], tail[3]])
    }
}

impl Default for MacPrefix {
    fn default() -> Self {
        // The historical prefix used by the platform for generated NICs.
        MacPrefix([0x00, 0x22])
    }
}

impl std::fmt::Display for MacPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}", self.0[0], self.0[1])
    }
}
