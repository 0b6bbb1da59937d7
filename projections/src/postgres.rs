//! PostgreSQL checkpoint store.
//!
//! An alternative to [`FileCheckpointStore`](crate::file::FileCheckpointStore)
//! for deployments where checkpoints should live next to other operational
//! state.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE component_checkpoints (
//!     component TEXT PRIMARY KEY,
//!     batch_id BIGINT NOT NULL,
//!     position JSONB NOT NULL,
//!     committed_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```

use chrono::{DateTime, Utc};
use orderstream_core::event_bus::LogPosition;
use orderstream_core::projection::{Checkpoint, CheckpointError, CheckpointStore};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed checkpoint store.
///
/// # Example
///
/// ```ignore
/// use orderstream_projections::postgres::PostgresCheckpointStore;
///
/// let store = PostgresCheckpointStore::connect("postgres://localhost/orderstream").await?;
/// store.migrate().await?;
///
/// if let Some(checkpoint) = store.load("orders").await? {
///     println!("orders committed batch {}", checkpoint.batch_id);
/// }
/// ```
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, CheckpointError> {
        let pool = PgPoolOptions::new()
            .max_connections(5) // Four components, one write per batch each
            .connect(database_url)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the checkpoint table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Storage`] if the migration fails.
    pub async fn migrate(&self) -> Result<(), CheckpointError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn load(
        &self,
        component: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>, CheckpointError>> + Send + '_>>
    {
        let component = component.to_string();
        Box::pin(async move {
            let row: Option<(i64, Json<serde_json::Value>, DateTime<Utc>)> = sqlx::query_as(
                "SELECT batch_id, position, committed_at
                 FROM component_checkpoints
                 WHERE component = $1",
            )
            .bind(&component)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to load checkpoint: {e}")))?;

            let Some((batch_id, Json(position), committed_at)) = row else {
                return Ok(None);
            };

            let corrupted = |reason: String| CheckpointError::Corrupted {
                component: component.clone(),
                reason,
            };
            let batch_id = u64::try_from(batch_id)
                .map_err(|_| corrupted(format!("negative batch id {batch_id}")))?;
            let position: LogPosition =
                serde_json::from_value(position).map_err(|e| corrupted(e.to_string()))?;

            Ok(Some(Checkpoint::new(
                component.clone(),
                batch_id,
                position,
                committed_at,
            )))
        })
    }

    fn save(
        &self,
        checkpoint: &Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + '_>> {
        let checkpoint = checkpoint.clone();
        Box::pin(async move {
            let batch_id = i64::try_from(checkpoint.batch_id).map_err(|_| {
                CheckpointError::Storage(format!(
                    "batch id {} does not fit BIGINT",
                    checkpoint.batch_id
                ))
            })?;

            sqlx::query(
                "INSERT INTO component_checkpoints (component, batch_id, position, committed_at, updated_at)
                 VALUES ($1, $2, $3, $4, now())
                 ON CONFLICT (component) DO UPDATE
                 SET batch_id = EXCLUDED.batch_id,
                     position = EXCLUDED.position,
                     committed_at = EXCLUDED.committed_at,
                     updated_at = now()",
            )
            .bind(&checkpoint.component)
            .bind(batch_id)
            .bind(Json(&checkpoint.position))
            .bind(checkpoint.committed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to save checkpoint: {e}")))?;

            Ok(())
        })
    }
}
