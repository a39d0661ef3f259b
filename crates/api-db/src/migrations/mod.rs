/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
use sqlx::PgPool;

/// The single embedded migrator, shared by [`migrate`] and any test that
/// sets up a schema. Keep this the only `sqlx::migrate!` invocation: each
/// expansion embeds another copy of the migration files in the binary.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[tracing::instrument(skip(pool))]
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
