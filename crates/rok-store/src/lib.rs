// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Shared Postgres pool and conditional-update helpers."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Every `rok-*` component that persists state (manifests, upgrades, audit
//! events, idempotency records, publish tasks) does so through a [`Store`]
//! handle rather than managing its own pool. State machines rely on
//! [`Store::conditional_update`] for exactly-once transitions: `UPDATE ...
//! WHERE id = $1 AND status = $2` contends safely under concurrent callers
//! without taking an application-level lock.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database driver returned an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A conditional update found no row in the expected prior state —
    /// either the row does not exist, or a concurrent caller already moved
    /// it past the expected state.
    #[error("no row in the expected state")]
    NoMatchingRow,
}

impl From<StoreError> for rok_error::RokError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoMatchingRow => rok_error::RokError::new(
                rok_error::ErrorCode::ManifestAlreadyApplied,
                "state changed concurrently",
            ),
            StoreError::Database(e) => {
                rok_error::RokError::new(rok_error::ErrorCode::Internal, "storage error")
                    .with_source(e)
            }
        }
    }
}

/// Shared Postgres connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to `database_url`, applying the crate's embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot be established or
    /// migrations fail to apply.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            StoreError::Database(sqlx::Error::Migrate(Box::new(e)))
        })?;
        Ok(Self { pool })
    }

    /// Wrap an already-constructed pool (used by components under test with
    /// a shared ephemeral database).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool for component-specific queries.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run a single-column, single-row conditional `UPDATE ... WHERE id = $1
    /// AND status = $2` style transition and report whether it matched.
    ///
    /// `table`, `id_column`, and `status_column` must be trusted
    /// (caller-controlled, not request input) since they are interpolated
    /// into the query text; only `id` and `expected_status` are bound
    /// parameters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoMatchingRow`] if no row matched the expected
    /// status (already transitioned, or does not exist), or
    /// [`StoreError::Database`] on a driver error.
    pub async fn conditional_update(
        &self,
        table: &str,
        id_column: &str,
        status_column: &str,
        id: uuid::Uuid,
        expected_status: &str,
        new_status: &str,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {table} SET {status_column} = $1, updated_at = now() \
             WHERE {id_column} = $2 AND {status_column} = $3"
        );
        let result = sqlx::query(&sql)
            .bind(new_status)
            .bind(id)
            .bind(expected_status)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::NoMatchingRow)
        }
    }
}
