/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

pub mod guest_network;
pub mod network;
pub mod options;
pub mod remote_nic;
pub mod reserved_ip;

pub use guest_network::{GuestNetwork, NewGuestNetwork, NicConfig};
pub use network::{AllocPolicy, AllocationError, IpAllocationDirection, Network, NetworkStatus, ServerType};
pub use options::Options;
pub use remote_nic::RemoteNic;
pub use reserved_ip::ReservedIp;
