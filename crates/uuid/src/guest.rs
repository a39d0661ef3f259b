/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

crate::typed_uuid!(
    /// The ID of a guest (virtual machine, baremetal server, or container
    /// host) managed by the platform.
    GuestId
);

crate::typed_uuid!(
    /// The row ID of one guest NIC (guestnetworks row).
    GuestNetworkId
);
