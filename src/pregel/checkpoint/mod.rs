//! Checkpointing for the Pregel runtime
//!
//! Checkpoints capture the complete workflow position at a superstep
//! boundary, enabling crash recovery without losing committed progress.
//! Every backend satisfies the same atomicity contract: a reader never
//! observes a half-written checkpoint.
//!
//! # Backends
//!
//! | Backend  | Atomicity mechanism                         | Feature |
//! |----------|---------------------------------------------|---------|
//! | Memory   | single `RwLock` map (tests only)            | -       |
//! | File     | write `.tmp` + rename                       | -       |
//! | SQLite   | one statement per save, WAL journal         | `checkpointer-sqlite` |
//! | Redis    | pipelined SET + sorted-index ZADD           | `checkpointer-redis` |
//! | Postgres | upsert on `(workflow_id, superstep)`        | `checkpointer-postgres` |

mod file;
#[cfg(feature = "checkpointer-postgres")]
mod postgres;
#[cfg(feature = "checkpointer-redis")]
mod redis;
#[cfg(feature = "checkpointer-sqlite")]
mod sqlite;

pub use file::FileCheckpointer;
#[cfg(feature = "checkpointer-postgres")]
pub use postgres::PostgresCheckpointer;
#[cfg(feature = "checkpointer-redis")]
pub use redis::RedisCheckpointer;
#[cfg(feature = "checkpointer-sqlite")]
pub use sqlite::SqliteCheckpointer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::PregelError;
use super::message::WorkflowMessage;
use super::state::WorkflowState;
use super::vertex::{VertexId, VertexState};

/// A durable snapshot of the workflow at a superstep boundary
///
/// Captures the committed state, the halt state of every vertex, the
/// undelivered message queues, and the retry counters, so a resumed run
/// continues exactly where the crashed one left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S>
where
    S: WorkflowState,
{
    /// Workflow instance this checkpoint belongs to
    pub workflow_id: String,

    /// Superstep that will run next after a restore
    pub superstep: u64,

    /// Committed workflow state
    pub state: S,

    /// Halt state of each vertex
    pub vertex_states: HashMap<VertexId, VertexState>,

    /// Messages queued for delivery in the next superstep
    pub pending_messages: HashMap<VertexId, Vec<WorkflowMessage>>,

    /// Per-vertex retry counters
    #[serde(default)]
    pub retry_counts: HashMap<VertexId, u32>,

    /// Wall-clock creation time
    pub timestamp: DateTime<Utc>,

    /// Free-form metadata for external tooling
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl<S> Checkpoint<S>
where
    S: WorkflowState,
{
    /// Create a new checkpoint
    pub fn new(
        workflow_id: impl Into<String>,
        superstep: u64,
        state: S,
        vertex_states: HashMap<VertexId, VertexState>,
        pending_messages: HashMap<VertexId, Vec<WorkflowMessage>>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            superstep,
            state,
            vertex_states,
            pending_messages,
            retry_counts: HashMap::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach retry counters
    pub fn with_retry_counts(mut self, retry_counts: HashMap<VertexId, u32>) -> Self {
        self.retry_counts = retry_counts;
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Total undelivered messages across all vertices
    pub fn pending_message_count(&self) -> usize {
        self.pending_messages.values().map(|v| v.len()).sum()
    }
}

/// Durable storage for checkpoints
///
/// All operations are asynchronous. A load of a pruned or never-saved
/// superstep returns `Ok(None)` - absence is not an error.
#[async_trait]
pub trait Checkpointer<S>: Send + Sync
where
    S: WorkflowState,
{
    /// Save a checkpoint atomically
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), PregelError>;

    /// Load a checkpoint by superstep number
    async fn load(&self, superstep: u64) -> Result<Option<Checkpoint<S>>, PregelError>;

    /// Load the most recent checkpoint
    async fn latest(&self) -> Result<Option<Checkpoint<S>>, PregelError>;

    /// List available checkpoint supersteps, ascending
    async fn list(&self) -> Result<Vec<u64>, PregelError>;

    /// Delete a specific checkpoint
    async fn delete(&self, superstep: u64) -> Result<(), PregelError>;

    /// Keep only the most recent `keep` checkpoints; returns deleted count
    async fn prune(&self, keep: usize) -> Result<usize, PregelError> {
        let checkpoints = self.list().await?;
        let to_delete = checkpoints.len().saturating_sub(keep);
        let mut deleted = 0;

        for superstep in checkpoints.into_iter().take(to_delete) {
            self.delete(superstep).await?;
            deleted += 1;
        }

        Ok(deleted)
    }

    /// Delete every checkpoint for this workflow
    async fn clear(&self) -> Result<(), PregelError> {
        for superstep in self.list().await? {
            self.delete(superstep).await?;
        }
        Ok(())
    }
}

/// Backend selection for `create_checkpointer`
#[derive(Debug, Clone, Default)]
pub enum CheckpointerConfig {
    /// In-memory checkpointing; not durable, tests and development only
    #[default]
    Memory,

    /// File-based checkpointing
    File {
        /// Directory for checkpoint files
        path: PathBuf,
        /// Compress checkpoint blobs with zstd
        compression: bool,
    },

    /// Embedded SQL checkpointing
    #[cfg(feature = "checkpointer-sqlite")]
    Sqlite {
        /// Database file path, or `:memory:` for tests
        path: String,
    },

    /// Remote key-value checkpointing
    #[cfg(feature = "checkpointer-redis")]
    Redis {
        /// Connection URL, e.g. `redis://localhost:6379`
        url: String,
        /// Optional expiry for checkpoint keys
        ttl_seconds: Option<u64>,
    },

    /// Remote SQL checkpointing
    #[cfg(feature = "checkpointer-postgres")]
    Postgres {
        /// Connection URL
        url: String,
    },
}

/// In-memory checkpointer for testing
#[derive(Debug, Default)]
pub struct MemoryCheckpointer<S>
where
    S: WorkflowState,
{
    checkpoints: tokio::sync::RwLock<HashMap<u64, Checkpoint<S>>>,
}

impl<S> MemoryCheckpointer<S>
where
    S: WorkflowState,
{
    pub fn new() -> Self {
        Self {
            checkpoints: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<S> Checkpointer<S> for MemoryCheckpointer<S>
where
    S: WorkflowState,
{
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), PregelError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint.superstep, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, superstep: u64) -> Result<Option<Checkpoint<S>>, PregelError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(&superstep).cloned())
    }

    async fn latest(&self) -> Result<Option<Checkpoint<S>>, PregelError> {
        let checkpoints = self.checkpoints.read().await;
        let max_superstep = checkpoints.keys().max().copied();
        match max_superstep {
            Some(superstep) => Ok(checkpoints.get(&superstep).cloned()),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<u64>, PregelError> {
        let checkpoints = self.checkpoints.read().await;
        let mut supersteps: Vec<u64> = checkpoints.keys().copied().collect();
        supersteps.sort_unstable();
        Ok(supersteps)
    }

    async fn delete(&self, superstep: u64) -> Result<(), PregelError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.remove(&superstep);
        Ok(())
    }
}

/// Instantiate a checkpointer backend from configuration
///
/// Async because the SQL backends open connections up front.
pub async fn create_checkpointer<S>(
    config: CheckpointerConfig,
    workflow_id: impl Into<String>,
) -> Result<Arc<dyn Checkpointer<S>>, PregelError>
where
    S: WorkflowState + Serialize + for<'de> Deserialize<'de> + 'static,
{
    let workflow_id = workflow_id.into();

    match config {
        CheckpointerConfig::Memory => Ok(Arc::new(MemoryCheckpointer::<S>::new())),

        CheckpointerConfig::File { path, compression } => Ok(Arc::new(FileCheckpointer::new(
            path,
            workflow_id,
            compression,
        ))),

        #[cfg(feature = "checkpointer-sqlite")]
        CheckpointerConfig::Sqlite { path } => {
            let checkpointer = SqliteCheckpointer::new(&path, workflow_id).await?;
            Ok(Arc::new(checkpointer))
        }

        #[cfg(feature = "checkpointer-redis")]
        CheckpointerConfig::Redis { url, ttl_seconds } => {
            let checkpointer = RedisCheckpointer::with_ttl(&url, workflow_id, ttl_seconds).await?;
            Ok(Arc::new(checkpointer))
        }

        #[cfg(feature = "checkpointer-postgres")]
        CheckpointerConfig::Postgres { url } => {
            let checkpointer = PostgresCheckpointer::new(&url, workflow_id).await?;
            Ok(Arc::new(checkpointer))
        }
    }
}
