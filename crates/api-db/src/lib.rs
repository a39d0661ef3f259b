/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::net::Ipv4Addr;

use mac_address::MacAddress;
use stratus_network::range::AddressRange;
use stratus_uuid::guest::GuestId;
use stratus_uuid::network::NetworkId;

use model::network::NetworkStatus;

pub mod address_table;
pub mod attach;
pub mod config;
pub mod ifname;
pub mod locks;
pub mod mac;
pub mod migrations;
pub mod pg;
pub mod reconcile;
pub mod stores;
pub mod testing;

pub use attach::GuestNicManager;
pub use reconcile::SyncResult;

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("query '{query}' failed: {source}")]
    QueryFailed {
        query: String,
        source: sqlx::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("candidate address {candidate} is outside network {network_id}")]
    CandidateOutOfRange {
        network_id: NetworkId,
        candidate: Ipv4Addr,
    },

    #[error("candidate address {candidate} is already in use")]
    CandidateOccupied { candidate: Ipv4Addr },

    #[error("no active reservation for {address:?} on network {network_id}")]
    ReservedAddressNotFound {
        network_id: NetworkId,
        address: Option<Ipv4Addr>,
    },

    #[error("network {network_id} is out of IP addresses")]
    AddressExhausted { network_id: NetworkId },

    #[error("gave up generating a unique {what} after {tries} tries")]
    TooManyAttempts { what: &'static str, tries: usize },

    #[error("network {network_id} is not available for allocation (status {status})")]
    NetworkNotAvailable {
        network_id: NetworkId,
        status: NetworkStatus,
    },

    #[error(transparent)]
    InvalidNetwork(#[from] model::network::NetworkValidationError),

    #[error("invalid MAC prefix {0:?}")]
    InvalidMacPrefix(String),

    #[error("network range {range} overlaps network {other}")]
    OverlappingNetwork {
        range: AddressRange,
        other: NetworkId,
    },

    #[error("network range {range} falls outside the VPC CIDR {cidr}")]
    RangeOutsideVpc {
        range: AddressRange,
        cidr: ipnetwork::Ipv4Network,
    },

    #[error("mac address {0} is already in use")]
    DuplicateMacAddress(MacAddress),

    #[error("address {ip} is already in use on network {network_id}")]
    DuplicateAddress {
        network_id: NetworkId,
        ip: Ipv4Addr,
    },

    #[error("NIC index {index} is already in use on guest {guest_id}")]
    DuplicateNicIndex { guest_id: GuestId, index: i16 },

    #[error("network {network_id} still has live NICs attached")]
    NetworkInUse { network_id: NetworkId },

    #[error("conflict: {0}")]
    Conflict(String),
}

impl DatabaseError {
    pub fn query(query: &str, source: sqlx::Error) -> Self {
        DatabaseError::QueryFailed {
            query: query.to_string(),
            source,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        DatabaseError::Internal(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        DatabaseError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// The gRPC status the API layer maps this error to.
    pub fn status_code(&self) -> tonic::Code {
        match self {
            DatabaseError::QueryFailed { .. } | DatabaseError::Internal(_) => tonic::Code::Internal,
            DatabaseError::NotFound { .. } | DatabaseError::ReservedAddressNotFound { .. } => {
                tonic::Code::NotFound
            }
            DatabaseError::CandidateOutOfRange { .. }
            | DatabaseError::InvalidNetwork(_)
            | DatabaseError::InvalidMacPrefix(_)
            | DatabaseError::RangeOutsideVpc { .. } => tonic::Code::InvalidArgument,
            DatabaseError::AddressExhausted { .. } => tonic::Code::ResourceExhausted,
            DatabaseError::TooManyAttempts { .. } => tonic::Code::Aborted,
            DatabaseError::NetworkNotAvailable { .. } => tonic::Code::FailedPrecondition,
            DatabaseError::CandidateOccupied { .. }
            | DatabaseError::OverlappingNetwork { .. }
            | DatabaseError::DuplicateMacAddress(_)
            | DatabaseError::DuplicateAddress { .. }
            | DatabaseError::DuplicateNicIndex { .. }
            | DatabaseError::NetworkInUse { .. }
            | DatabaseError::Conflict(_) => tonic::Code::AlreadyExists,
        }
    }

    /// Duplicate-MAC conflicts are the one insert failure worth retrying
    /// with a fresh MAC; everything else aborts the attach.
    pub fn is_mac_conflict(&self) -> bool {
        matches!(self, DatabaseError::DuplicateMacAddress(_))
    }
}
