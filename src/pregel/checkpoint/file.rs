//! File-based checkpointer
//!
//! Stores each checkpoint as a framed JSON blob in a per-workflow
//! directory. Writes go to a `.tmp` file first and are renamed into place,
//! so a crashed save never leaves a readable half-checkpoint behind.
//!
//! # Frame format
//!
//! Every file is self-describing regardless of its name: a 4-byte magic
//! (`GSCP`) and one scheme byte precede the payload.
//!
//! ```text
//! +------+--------+-------------------------+
//! | GSCP | scheme | payload                 |
//! +------+--------+-------------------------+
//!          0x00 = raw JSON
//!          0x01 = zstd-compressed JSON
//! ```
//!
//! # Directory layout
//!
//! ```text
//! checkpoints/
//! └── {workflow_id}/
//!     ├── checkpoint_00001.gscp
//!     ├── checkpoint_00005.gscp
//!     └── checkpoint_00010.gscp
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{Checkpoint, Checkpointer};
use crate::pregel::error::PregelError;
use crate::pregel::state::WorkflowState;

const MAGIC: &[u8; 4] = b"GSCP";
const SCHEME_RAW: u8 = 0x00;
const SCHEME_ZSTD: u8 = 0x01;

const FILE_PREFIX: &str = "checkpoint_";
const FILE_SUFFIX: &str = ".gscp";

/// File-based checkpointer with atomic writes
#[derive(Debug)]
pub struct FileCheckpointer {
    workflow_path: PathBuf,
    compression: bool,
}

impl FileCheckpointer {
    /// Create a new file-based checkpointer
    ///
    /// Checkpoints land in `{base_path}/{workflow_id}/`. With `compression`
    /// enabled, payloads are zstd-encoded; either way the frame header makes
    /// old and new files readable.
    pub fn new(
        base_path: impl Into<PathBuf>,
        workflow_id: impl AsRef<str>,
        compression: bool,
    ) -> Self {
        let workflow_path = base_path.into().join(workflow_id.as_ref());
        Self {
            workflow_path,
            compression,
        }
    }

    fn checkpoint_path(&self, superstep: u64) -> PathBuf {
        self.workflow_path
            .join(format!("{}{:05}{}", FILE_PREFIX, superstep, FILE_SUFFIX))
    }

    async fn ensure_dir(&self) -> Result<(), PregelError> {
        fs::create_dir_all(&self.workflow_path).await.map_err(|e| {
            PregelError::checkpoint_error(format!("failed to create directory: {}", e))
        })
    }

    /// Wrap a JSON payload in the magic-byte frame
    fn encode_frame(&self, json: Vec<u8>) -> Result<Vec<u8>, PregelError> {
        let (scheme, payload) = if self.compression {
            (SCHEME_ZSTD, Self::compress(&json)?)
        } else {
            (SCHEME_RAW, json)
        };

        let mut framed = Vec::with_capacity(MAGIC.len() + 1 + payload.len());
        framed.extend_from_slice(MAGIC);
        framed.push(scheme);
        framed.extend_from_slice(&payload);
        Ok(framed)
    }

    /// Strip the frame and return the JSON payload
    fn decode_frame(data: &[u8]) -> Result<Vec<u8>, PregelError> {
        if data.len() < MAGIC.len() + 1 || &data[..MAGIC.len()] != MAGIC {
            return Err(PregelError::checkpoint_error(
                "not a checkpoint file: bad magic header",
            ));
        }

        let scheme = data[MAGIC.len()];
        let payload = &data[MAGIC.len() + 1..];

        match scheme {
            SCHEME_RAW => Ok(payload.to_vec()),
            SCHEME_ZSTD => Self::decompress(payload),
            other => Err(PregelError::checkpoint_error(format!(
                "unknown compression scheme byte: {:#04x}",
                other
            ))),
        }
    }

    fn compress(data: &[u8]) -> Result<Vec<u8>, PregelError> {
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3)
            .map_err(|e| PregelError::checkpoint_error(format!("compression init failed: {}", e)))?;
        encoder
            .write_all(data)
            .map_err(|e| PregelError::checkpoint_error(format!("compression write failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| PregelError::checkpoint_error(format!("compression finish failed: {}", e)))
    }

    fn decompress(data: &[u8]) -> Result<Vec<u8>, PregelError> {
        zstd::stream::decode_all(data)
            .map_err(|e| PregelError::checkpoint_error(format!("decompression failed: {}", e)))
    }

    /// Superstep number of a checkpoint file, or `None` for anything else
    ///
    /// Requiring both the prefix and the `.gscp` suffix keeps `.tmp`
    /// leftovers and foreign files out of listings.
    fn parse_superstep(path: &Path) -> Option<u64> {
        path.file_name()?
            .to_str()?
            .strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }

    async fn list_supersteps(&self) -> Result<Vec<u64>, PregelError> {
        // A workflow that never saved has no directory yet; that is an
        // empty listing, not an error.
        let mut entries = match fs::read_dir(&self.workflow_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PregelError::checkpoint_error(format!(
                    "failed to read directory: {}",
                    e
                )))
            }
        };

        let mut supersteps = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PregelError::checkpoint_error(format!("failed to read entry: {}", e)))?
        {
            if let Some(superstep) = Self::parse_superstep(&entry.path()) {
                supersteps.push(superstep);
            }
        }

        supersteps.sort_unstable();
        Ok(supersteps)
    }
}

#[async_trait]
impl<S> Checkpointer<S> for FileCheckpointer
where
    S: WorkflowState + Serialize + for<'de> Deserialize<'de>,
{
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), PregelError> {
        self.ensure_dir().await?;

        let json = serde_json::to_vec(checkpoint)
            .map_err(|e| PregelError::checkpoint_error(format!("serialization failed: {}", e)))?;
        let data = self.encode_frame(json)?;

        let final_path = self.checkpoint_path(checkpoint.superstep);
        let temp_path = final_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            PregelError::checkpoint_error(format!("failed to create temp file: {}", e))
        })?;

        file.write_all(&data)
            .await
            .map_err(|e| PregelError::checkpoint_error(format!("failed to write data: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| PregelError::checkpoint_error(format!("failed to sync file: {}", e)))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| PregelError::checkpoint_error(format!("failed to rename file: {}", e)))?;

        Ok(())
    }

    async fn load(&self, superstep: u64) -> Result<Option<Checkpoint<S>>, PregelError> {
        let data = match fs::read(self.checkpoint_path(superstep)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PregelError::checkpoint_error(format!(
                    "failed to read file: {}",
                    e
                )))
            }
        };

        let json = Self::decode_frame(&data)?;
        let checkpoint: Checkpoint<S> = serde_json::from_slice(&json)
            .map_err(|e| PregelError::checkpoint_error(format!("deserialization failed: {}", e)))?;

        Ok(Some(checkpoint))
    }

    async fn latest(&self) -> Result<Option<Checkpoint<S>>, PregelError> {
        match self.list_supersteps().await?.pop() {
            Some(superstep) => self.load(superstep).await,
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<u64>, PregelError> {
        self.list_supersteps().await
    }

    async fn delete(&self, superstep: u64) -> Result<(), PregelError> {
        match fs::remove_file(self.checkpoint_path(superstep)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PregelError::checkpoint_error(format!(
                "failed to delete file: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::message::WorkflowMessage;
    use crate::pregel::state::UnitState;
    use crate::pregel::vertex::{VertexId, VertexState};
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// A checkpoint with enough structure to notice field loss: one halted
    /// router, one completed fetcher, and a queued batch of page payloads.
    fn crawl_checkpoint(workflow_id: &str, superstep: u64, queued_pages: usize) -> Checkpoint<UnitState> {
        let mut vertex_states = HashMap::new();
        vertex_states.insert(VertexId::new("router"), VertexState::Halted);
        vertex_states.insert(VertexId::new("fetcher"), VertexState::Completed);

        let mut pending = HashMap::new();
        pending.insert(
            VertexId::new("router"),
            (0..queued_pages)
                .map(|i| WorkflowMessage::data(format!("page_{}", i), format!("/crawl/{}", i)))
                .collect::<Vec<_>>(),
        );

        Checkpoint::new(workflow_id, superstep, UnitState, vertex_states, pending)
            .with_retry_counts(HashMap::from([(VertexId::new("fetcher"), 2)]))
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path(), "orders-sync", false);

        checkpointer
            .save(&crawl_checkpoint("orders-sync", 12, 4))
            .await
            .unwrap();

        let loaded: Checkpoint<UnitState> = checkpointer.load(12).await.unwrap().unwrap();
        assert_eq!(loaded.workflow_id, "orders-sync");
        assert_eq!(loaded.superstep, 12);
        assert_eq!(loaded.vertex_states.len(), 2);
        assert!(loaded.vertex_states[&VertexId::new("fetcher")].is_completed());
        assert_eq!(loaded.pending_message_count(), 4);
        assert_eq!(loaded.retry_counts[&VertexId::new("fetcher")], 2);
    }

    #[tokio::test]
    async fn compression_shrinks_repetitive_payloads() {
        let dir = tempdir().unwrap();
        let raw = FileCheckpointer::new(dir.path(), "bulk-raw", false);
        let packed = FileCheckpointer::new(dir.path(), "bulk-packed", true);

        // 40 near-identical queued messages compress well.
        raw.save(&crawl_checkpoint("bulk-raw", 6, 40)).await.unwrap();
        packed
            .save(&crawl_checkpoint("bulk-packed", 6, 40))
            .await
            .unwrap();

        let raw_len = std::fs::metadata(dir.path().join("bulk-raw/checkpoint_00006.gscp"))
            .unwrap()
            .len();
        let packed_len = std::fs::metadata(dir.path().join("bulk-packed/checkpoint_00006.gscp"))
            .unwrap()
            .len();
        assert!(packed_len < raw_len, "{} >= {}", packed_len, raw_len);

        let loaded: Checkpoint<UnitState> = packed.load(6).await.unwrap().unwrap();
        assert_eq!(loaded.pending_message_count(), 40);
    }

    #[tokio::test]
    async fn frame_header_identifies_scheme() {
        let dir = tempdir().unwrap();
        let raw = FileCheckpointer::new(dir.path(), "frame-raw", false);
        let packed = FileCheckpointer::new(dir.path(), "frame-packed", true);

        raw.save(&crawl_checkpoint("frame-raw", 2, 1)).await.unwrap();
        packed
            .save(&crawl_checkpoint("frame-packed", 2, 1))
            .await
            .unwrap();

        let raw_bytes = std::fs::read(dir.path().join("frame-raw/checkpoint_00002.gscp")).unwrap();
        let packed_bytes =
            std::fs::read(dir.path().join("frame-packed/checkpoint_00002.gscp")).unwrap();

        assert_eq!(&raw_bytes[..4], b"GSCP");
        assert_eq!(raw_bytes[4], 0x00);
        assert_eq!(&packed_bytes[..4], b"GSCP");
        assert_eq!(packed_bytes[4], 0x01);
    }

    #[tokio::test]
    async fn missing_superstep_loads_as_none() {
        let dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path(), "orders-sync", false);

        // Neither the directory nor the file exists yet.
        let absent: Option<Checkpoint<UnitState>> = checkpointer.load(31).await.unwrap();
        assert!(absent.is_none());
    }

    #[tokio::test]
    async fn listing_sorts_numerically_and_skips_foreign_files() {
        let dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path(), "orders-sync", false);

        for superstep in [20, 3, 11] {
            checkpointer
                .save(&crawl_checkpoint("orders-sync", superstep, 1))
                .await
                .unwrap();
        }

        // Stray files in the directory must not show up as checkpoints.
        std::fs::write(dir.path().join("orders-sync/checkpoint_00099.tmp"), b"junk").unwrap();
        std::fs::write(dir.path().join("orders-sync/notes.txt"), b"junk").unwrap();

        let list = <FileCheckpointer as Checkpointer<UnitState>>::list(&checkpointer)
            .await
            .unwrap();
        assert_eq!(list, vec![3, 11, 20]);
    }

    #[tokio::test]
    async fn latest_is_highest_superstep() {
        let dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path(), "orders-sync", false);

        for superstep in [2, 9, 4] {
            checkpointer
                .save(&crawl_checkpoint("orders-sync", superstep, 1))
                .await
                .unwrap();
        }

        let latest: Checkpoint<UnitState> = checkpointer.latest().await.unwrap().unwrap();
        assert_eq!(latest.superstep, 9);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path(), "orders-sync", false);

        checkpointer
            .save(&crawl_checkpoint("orders-sync", 6, 1))
            .await
            .unwrap();

        <FileCheckpointer as Checkpointer<UnitState>>::delete(&checkpointer, 6)
            .await
            .unwrap();
        let gone: Option<Checkpoint<UnitState>> = checkpointer.load(6).await.unwrap();
        assert!(gone.is_none());

        // A second delete of the same step is a no-op, not an error.
        <FileCheckpointer as Checkpointer<UnitState>>::delete(&checkpointer, 6)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn prune_drops_oldest_first() {
        let dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path(), "orders-sync", false);

        for superstep in 10..=16 {
            checkpointer
                .save(&crawl_checkpoint("orders-sync", superstep, 1))
                .await
                .unwrap();
        }

        let deleted = <FileCheckpointer as Checkpointer<UnitState>>::prune(&checkpointer, 3)
            .await
            .unwrap();
        assert_eq!(deleted, 4);

        let remaining = <FileCheckpointer as Checkpointer<UnitState>>::list(&checkpointer)
            .await
            .unwrap();
        assert_eq!(remaining, vec![14, 15, 16]);

        // A pruned step is gone, observable only as None.
        let pruned: Option<Checkpoint<UnitState>> = checkpointer.load(10).await.unwrap();
        assert!(pruned.is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path(), "orders-sync", false);

        checkpointer
            .save(&crawl_checkpoint("orders-sync", 21, 1))
            .await
            .unwrap();

        assert!(!dir.path().join("orders-sync/checkpoint_00021.tmp").exists());
        assert!(dir.path().join("orders-sync/checkpoint_00021.gscp").exists());
    }

    #[test]
    fn parse_superstep_requires_both_prefix_and_suffix() {
        assert_eq!(
            FileCheckpointer::parse_superstep(Path::new("checkpoint_00042.gscp")),
            Some(42)
        );
        assert_eq!(
            FileCheckpointer::parse_superstep(Path::new("checkpoint_7.gscp")),
            Some(7)
        );
        assert_eq!(
            FileCheckpointer::parse_superstep(Path::new("checkpoint_00042.tmp")),
            None
        );
        assert_eq!(
            FileCheckpointer::parse_superstep(Path::new("checkpoint_.gscp")),
            None
        );
        assert_eq!(
            FileCheckpointer::parse_superstep(Path::new("notes.txt")),
            None
        );
    }

    #[test]
    fn decode_rejects_foreign_bytes() {
        // Too short, wrong magic, and an unknown scheme byte.
        assert!(FileCheckpointer::decode_frame(b"GS").is_err());
        assert!(FileCheckpointer::decode_frame(b"JSON{\"superstep\":1}").is_err());
        assert!(FileCheckpointer::decode_frame(b"GSCP\x7f{}").is_err());
    }
}
