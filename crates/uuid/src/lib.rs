/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

pub mod guest;
pub mod network;
pub mod tap;
pub mod vpc;

#[derive(Debug, thiserror::Error)]
pub enum UuidConversionError {
    #[error("The value {value} is not a valid {ty}")]
    InvalidUuid { ty: &'static str, value: String },
}

/// Declares a strongly typed UUID wrapper with the trait implementations
/// allowing it to be passed around as a UUID, serialized, bound to sqlx
/// queries, etc. All of the stratus IDs are minted through this macro so
/// they behave identically.
#[macro_export]
macro_rules! typed_uuid {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(
            Debug,
            Clone,
            Copy,
            serde::Serialize,
            serde::Deserialize,
            PartialOrd,
            Ord,
            Eq,
            PartialEq,
            Hash,
            Default,
        )]
        #[cfg_attr(feature = "sqlx", derive(sqlx::FromRow, sqlx::Type))]
        #[cfg_attr(feature = "sqlx", sqlx(type_name = "UUID"))]
        #[repr(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new_random() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<&$name> for uuid::Uuid {
            fn from(id: &$name) -> Self {
                id.0
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(value: uuid::Uuid) -> Self {
                $name(value)
            }
        }

        impl From<&uuid::Uuid> for $name {
            fn from(value: &uuid::Uuid) -> Self {
                $name(*value)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::UuidConversionError;
            fn from_str(input: &str) -> Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(input).map_err(|_| {
                    $crate::UuidConversionError::InvalidUuid {
                        ty: stringify!($name),
                        value: input.to_string(),
                    }
                })?))
            }
        }

        #[cfg(feature = "sqlx")]
        impl sqlx::postgres::PgHasArrayType for $name {
            fn array_type_info() -> sqlx::postgres::PgTypeInfo {
                <sqlx::types::Uuid as sqlx::postgres::PgHasArrayType>::array_type_info()
            }

            fn array_compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <sqlx::types::Uuid as sqlx::postgres::PgHasArrayType>::array_compatible(ty)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::network::NetworkId;

    #[test]
    fn test_roundtrip() {
        let id = NetworkId::new_random();
        let parsed = NetworkId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_invalid() {
        assert!(NetworkId::from_str("not-a-uuid").is_err());
    }
}
