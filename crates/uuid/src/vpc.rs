/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

crate::typed_uuid!(
    /// The ID of a VPC. A wire belongs to a VPC; a network belongs to a wire.
    VpcId
);
