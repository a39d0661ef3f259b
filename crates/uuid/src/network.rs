/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

crate::typed_uuid!(
    /// NetworkId is a strongly typed UUID specific to a network, with trait
    /// implementations allowing it to be passed around as a UUID, bound to
    /// sqlx queries, etc. This is the same shape as GuestId, VpcId, and
    /// basically all of the IDs in this workspace.
    NetworkId
);

crate::typed_uuid!(
    /// The ID of one reservedips row.
    ReservedIpId
);

crate::typed_uuid!(
    /// The ID of the layer-2 wire a network hangs off of.
    WireId
);
