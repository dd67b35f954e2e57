//! PostgreSQL-based checkpointer
//!
//! Remote SQL persistence with connection pooling. Saves are a single
//! upsert on `(workflow_id, superstep)`, so a re-save of the same step is
//! atomic and a reader always sees either the old or the new row.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS checkpoints (
//!     id SERIAL PRIMARY KEY,
//!     workflow_id TEXT NOT NULL,
//!     superstep BIGINT NOT NULL,
//!     data BYTEA NOT NULL,
//!     metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     UNIQUE(workflow_id, superstep)
//! );
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{Checkpoint, Checkpointer};
use crate::pregel::error::PregelError;
use crate::pregel::state::WorkflowState;

/// PostgreSQL checkpointer
#[derive(Clone)]
pub struct PostgresCheckpointer {
    pool: PgPool,
    workflow_id: String,
}

impl PostgresCheckpointer {
    /// Connect and initialize the schema
    pub async fn new(
        url: impl AsRef<str>,
        workflow_id: impl Into<String>,
    ) -> Result<Self, PregelError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url.as_ref())
            .await
            .map_err(|e| {
                PregelError::checkpoint_error(format!("failed to connect to postgres: {}", e))
            })?;

        let workflow_id = workflow_id.into();

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id SERIAL PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                superstep BIGINT NOT NULL,
                data BYTEA NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE(workflow_id, superstep)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| PregelError::checkpoint_error(format!("failed to create schema: {}", e)))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflow_superstep
                ON checkpoints(workflow_id, superstep)
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| PregelError::checkpoint_error(format!("failed to create index: {}", e)))?;

        Ok(Self { pool, workflow_id })
    }
}

#[async_trait]
impl<S> Checkpointer<S> for PostgresCheckpointer
where
    S: WorkflowState + Serialize + for<'de> Deserialize<'de> + 'static,
{
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), PregelError> {
        let data = serde_json::to_vec(checkpoint)
            .map_err(|e| PregelError::checkpoint_error(format!("serialization failed: {}", e)))?;

        let metadata = serde_json::to_value(&checkpoint.metadata)
            .map_err(|e| PregelError::checkpoint_error(format!("metadata encoding failed: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (workflow_id, superstep, data, metadata)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (workflow_id, superstep)
            DO UPDATE SET data = EXCLUDED.data, metadata = EXCLUDED.metadata, created_at = NOW()
            "#,
        )
        .bind(&self.workflow_id)
        .bind(checkpoint.superstep as i64)
        .bind(&data)
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| PregelError::checkpoint_error(format!("failed to save checkpoint: {}", e)))?;

        Ok(())
    }

    async fn load(&self, superstep: u64) -> Result<Option<Checkpoint<S>>, PregelError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT data FROM checkpoints WHERE workflow_id = $1 AND superstep = $2",
        )
        .bind(&self.workflow_id)
        .bind(superstep as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PregelError::checkpoint_error(format!("failed to load checkpoint: {}", e)))?;

        match row {
            Some((data,)) => {
                let checkpoint: Checkpoint<S> = serde_json::from_slice(&data).map_err(|e| {
                    PregelError::checkpoint_error(format!("deserialization failed: {}", e))
                })?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    async fn latest(&self) -> Result<Option<Checkpoint<S>>, PregelError> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT MAX(superstep) FROM checkpoints WHERE workflow_id = $1")
                .bind(&self.workflow_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    PregelError::checkpoint_error(format!("failed to get latest: {}", e))
                })?;

        match row {
            Some((Some(superstep),)) => self.load(superstep as u64).await,
            _ => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<u64>, PregelError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT superstep FROM checkpoints WHERE workflow_id = $1 ORDER BY superstep ASC",
        )
        .bind(&self.workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PregelError::checkpoint_error(format!("failed to list checkpoints: {}", e)))?;

        Ok(rows.into_iter().map(|(s,)| s as u64).collect())
    }

    async fn delete(&self, superstep: u64) -> Result<(), PregelError> {
        sqlx::query("DELETE FROM checkpoints WHERE workflow_id = $1 AND superstep = $2")
            .bind(&self.workflow_id)
            .bind(superstep as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                PregelError::checkpoint_error(format!("failed to delete checkpoint: {}", e))
            })?;

        Ok(())
    }
}
