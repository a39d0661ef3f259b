/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

crate::typed_uuid!(
    /// The ID of a host tap service. Tap services hold MAC addresses and
    /// therefore participate in global MAC uniqueness checks.
    TapServiceId
);
