//! Redis-based checkpointer
//!
//! Remote key-value persistence. Each save pipelines the checkpoint blob
//! `SET` together with a `ZADD` onto a per-workflow sorted index, so
//! listing never scans the keyspace. Optional TTL expires stale runs.
//!
//! # Key layout
//!
//! ```text
//! workflow:{workflow_id}:checkpoint:{superstep:05}   blob
//! workflow:{workflow_id}:checkpoints                 sorted set (score = superstep)
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::{Checkpoint, Checkpointer};
use crate::pregel::error::PregelError;
use crate::pregel::state::WorkflowState;

/// Redis checkpointer for shared, low-latency persistence
#[derive(Clone)]
pub struct RedisCheckpointer {
    conn: ConnectionManager,
    workflow_id: String,
    ttl_seconds: Option<u64>,
}

impl RedisCheckpointer {
    /// Connect to Redis
    pub async fn new(
        url: impl AsRef<str>,
        workflow_id: impl Into<String>,
    ) -> Result<Self, PregelError> {
        Self::with_ttl(url, workflow_id, None).await
    }

    /// Connect with an optional per-key TTL
    ///
    /// With a TTL set, checkpoints expire on their own; the sorted index is
    /// re-trimmed lazily on `list`.
    pub async fn with_ttl(
        url: impl AsRef<str>,
        workflow_id: impl Into<String>,
        ttl_seconds: Option<u64>,
    ) -> Result<Self, PregelError> {
        let client = redis::Client::open(url.as_ref()).map_err(|e| {
            PregelError::checkpoint_error(format!("failed to create redis client: {}", e))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            PregelError::checkpoint_error(format!("failed to connect to redis: {}", e))
        })?;

        Ok(Self {
            conn,
            workflow_id: workflow_id.into(),
            ttl_seconds,
        })
    }

    fn checkpoint_key(&self, superstep: u64) -> String {
        format!("workflow:{}:checkpoint:{:05}", self.workflow_id, superstep)
    }

    fn index_key(&self) -> String {
        format!("workflow:{}:checkpoints", self.workflow_id)
    }
}

#[async_trait]
impl<S> Checkpointer<S> for RedisCheckpointer
where
    S: WorkflowState + Serialize + for<'de> Deserialize<'de> + 'static,
{
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), PregelError> {
        let data = serde_json::to_vec(checkpoint)
            .map_err(|e| PregelError::checkpoint_error(format!("serialization failed: {}", e)))?;

        let key = self.checkpoint_key(checkpoint.superstep);
        let index = self.index_key();
        let mut conn = self.conn.clone();

        // Blob and index update travel in one pipeline so readers never see
        // an indexed-but-missing checkpoint.
        let mut pipe = redis::pipe();
        if let Some(ttl) = self.ttl_seconds {
            pipe.set_ex(&key, data.as_slice(), ttl);
            pipe.zadd(&index, checkpoint.superstep, checkpoint.superstep as f64);
            pipe.expire(&index, ttl as i64);
        } else {
            pipe.set(&key, data.as_slice());
            pipe.zadd(&index, checkpoint.superstep, checkpoint.superstep as f64);
        }

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| PregelError::checkpoint_error(format!("failed to save checkpoint: {}", e)))?;

        Ok(())
    }

    async fn load(&self, superstep: u64) -> Result<Option<Checkpoint<S>>, PregelError> {
        let key = self.checkpoint_key(superstep);
        let mut conn = self.conn.clone();

        let data: Option<Vec<u8>> = conn.get(&key).await.map_err(|e| {
            PregelError::checkpoint_error(format!("failed to load checkpoint: {}", e))
        })?;

        match data {
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
        let supersteps = <Self as Checkpointer<S>>::list(self).await?;
        match supersteps.last() {
            Some(&superstep) => self.load(superstep).await,
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<u64>, PregelError> {
        let index = self.index_key();
        let mut conn = self.conn.clone();

        let supersteps: Vec<u64> = conn.zrange(&index, 0, -1).await.map_err(|e| {
            PregelError::checkpoint_error(format!("failed to list checkpoints: {}", e))
        })?;

        // TTL-expired blobs may linger in the index; drop the dangling
        // entries as they are discovered.
        if self.ttl_seconds.is_some() && !supersteps.is_empty() {
            let mut live = Vec::with_capacity(supersteps.len());
            for superstep in supersteps {
                let exists: bool = conn
                    .exists(self.checkpoint_key(superstep))
                    .await
                    .map_err(|e| {
                        PregelError::checkpoint_error(format!("failed to probe checkpoint: {}", e))
                    })?;
                if exists {
                    live.push(superstep);
                } else {
                    let _: () = conn.zrem(&index, superstep).await.map_err(|e| {
                        PregelError::checkpoint_error(format!("failed to trim index: {}", e))
                    })?;
                }
            }
            return Ok(live);
        }

        Ok(supersteps)
    }

    async fn delete(&self, superstep: u64) -> Result<(), PregelError> {
        let key = self.checkpoint_key(superstep);
        let index = self.index_key();
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.del(&key);
        pipe.zrem(&index, superstep);

        pipe.query_async::<_, ()>(&mut conn).await.map_err(|e| {
            PregelError::checkpoint_error(format!("failed to delete checkpoint: {}", e))
        })?;

        Ok(())
    }
}
