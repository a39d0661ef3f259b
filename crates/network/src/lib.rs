/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

pub mod mac;
pub mod range;

pub use range::{AddressRange, AddressRangeError};
