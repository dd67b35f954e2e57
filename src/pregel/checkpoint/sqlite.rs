//! SQLite-based checkpointer
//!
//! Embedded SQL persistence with ACID guarantees. Supports file-backed and
//! in-memory databases; the latter is handy for tests.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS checkpoints (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     workflow_id TEXT NOT NULL,
//!     superstep INTEGER NOT NULL,
//!     data BLOB NOT NULL,
//!     created_at TEXT NOT NULL,
//!     UNIQUE(workflow_id, superstep)
//! );
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use super::{Checkpoint, Checkpointer};
use crate::pregel::error::PregelError;
use crate::pregel::state::WorkflowState;

/// SQLite checkpointer for durable single-node persistence
#[derive(Debug)]
pub struct SqliteCheckpointer {
    conn: Arc<Connection>,
    workflow_id: String,
}

impl SqliteCheckpointer {
    /// Open (or create) the database and initialize the schema
    ///
    /// `path` is a database file path, or `:memory:` for an in-memory
    /// database.
    pub async fn new(
        path: impl AsRef<str>,
        workflow_id: impl Into<String>,
    ) -> Result<Self, PregelError> {
        let path = path.as_ref().to_string();
        let workflow_id = workflow_id.into();

        let conn = Connection::open(&path)
            .await
            .map_err(|e| PregelError::checkpoint_error(format!("failed to open sqlite: {}", e)))?;

        conn.call(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                CREATE TABLE IF NOT EXISTS checkpoints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workflow_id TEXT NOT NULL,
                    superstep INTEGER NOT NULL,
                    data BLOB NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE(workflow_id, superstep)
                );
                CREATE INDEX IF NOT EXISTS idx_workflow_superstep
                    ON checkpoints(workflow_id, superstep);
                "#,
            )?;
            Ok(())
        })
        .await
        .map_err(|e| PregelError::checkpoint_error(format!("failed to create schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(conn),
            workflow_id,
        })
    }
}

#[async_trait]
impl<S> Checkpointer<S> for SqliteCheckpointer
where
    S: WorkflowState + Serialize + for<'de> Deserialize<'de> + 'static,
{
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), PregelError> {
        let data = serde_json::to_vec(checkpoint)
            .map_err(|e| PregelError::checkpoint_error(format!("serialization failed: {}", e)))?;

        let workflow_id = self.workflow_id.clone();
        let superstep = checkpoint.superstep;
        let created_at = checkpoint.timestamp.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO checkpoints (workflow_id, superstep, data, created_at)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    rusqlite::params![workflow_id, superstep as i64, data, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| {
                PregelError::checkpoint_error(format!("failed to save checkpoint: {}", e))
            })?;

        Ok(())
    }

    async fn load(&self, superstep: u64) -> Result<Option<Checkpoint<S>>, PregelError> {
        let workflow_id = self.workflow_id.clone();

        let result = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM checkpoints WHERE workflow_id = ?1 AND superstep = ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![workflow_id, superstep as i64])?;

                if let Some(row) = rows.next()? {
                    let data: Vec<u8> = row.get(0)?;
                    Ok(Some(data))
                } else {
                    Ok(None)
                }
            })
            .await
            .map_err(|e| {
                PregelError::checkpoint_error(format!("failed to load checkpoint: {}", e))
            })?;

        match result {
            Some(data) => {
                let checkpoint: Checkpoint<S> = serde_json::from_slice(&data).map_err(|e| {
                    PregelError::checkpoint_error(format!("deserialization failed: {}", e))
                })?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    async fn latest(&self) -> Result<Option<Checkpoint<S>>, PregelError> {
        let workflow_id = self.workflow_id.clone();

        let max_superstep = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT MAX(superstep) FROM checkpoints WHERE workflow_id = ?1")?;
                let mut rows = stmt.query(rusqlite::params![workflow_id])?;

                if let Some(row) = rows.next()? {
                    let superstep: Option<i64> = row.get(0)?;
                    Ok(superstep.map(|s| s as u64))
                } else {
                    Ok(None)
                }
            })
            .await
            .map_err(|e| {
                PregelError::checkpoint_error(format!("failed to get latest checkpoint: {}", e))
            })?;

        match max_superstep {
            Some(superstep) => self.load(superstep).await,
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<u64>, PregelError> {
        let workflow_id = self.workflow_id.clone();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT superstep FROM checkpoints WHERE workflow_id = ?1 ORDER BY superstep ASC",
                )?;
                let rows = stmt.query_map(rusqlite::params![workflow_id], |row| {
                    let superstep: i64 = row.get(0)?;
                    Ok(superstep as u64)
                })?;

                let mut supersteps = Vec::new();
                for row in rows {
                    supersteps.push(row?);
                }
                Ok(supersteps)
            })
            .await
            .map_err(|e| {
                PregelError::checkpoint_error(format!("failed to list checkpoints: {}", e))
            })
    }

    async fn delete(&self, superstep: u64) -> Result<(), PregelError> {
        let workflow_id = self.workflow_id.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM checkpoints WHERE workflow_id = ?1 AND superstep = ?2",
                    rusqlite::params![workflow_id, superstep as i64],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| {
                PregelError::checkpoint_error(format!("failed to delete checkpoint: {}", e))
            })?;

        Ok(())
    }
}
