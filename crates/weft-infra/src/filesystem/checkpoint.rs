//! Checkpoint store keeping one JSON document per checkpoint on disk.
//!
//! Writes go to a uniquely named temp file in the same directory, are
//! fsynced, then renamed over `{id}.json`. Rename is atomic on the same
//! filesystem, so readers see either the old or the new document, never a
//! torn one, and concurrent saves of one id resolve last-write-wins.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use weft_core::repository::checkpoint::{CheckpointStore, ids_to_prune, sort_newest_first};
use weft_types::error::RepositoryError;
use weft_types::workflow::Checkpoint;

const EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp-";

/// File-backed implementation of `CheckpointStore`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Use `dir` for checkpoint files, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    async fn read(path: &Path) -> Result<Option<Checkpoint>, RepositoryError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            RepositoryError::Query(format!("invalid checkpoint file {}: {e}", path.display()))
        })
    }

    /// Every readable checkpoint in the directory. Unreadable files are
    /// skipped with a warning so one corrupt file does not hide the rest.
    async fn read_all(&self) -> Result<Vec<Checkpoint>, RepositoryError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut checkpoints = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_checkpoint = path.extension().is_some_and(|ext| ext == EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX);
            if !is_checkpoint {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(cp)) => checkpoints.push(cp),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping checkpoint file"),
            }
        }
        sort_newest_first(&mut checkpoints);
        Ok(checkpoints)
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| RepositoryError::Query(format!("serialize checkpoint: {e}")))?;

        let temp = self
            .dir
            .join(format!("{TEMP_PREFIX}{}-{}.{EXTENSION}", checkpoint.id, Uuid::now_v7()));
        let mut file = tokio::fs::File::create(&temp).await?;
        let written = async {
            file.write_all(&json).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, self.path_for(&checkpoint.id)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        Self::read(&self.path_for(id)).await
    }

    async fn list(&self, run_id: Option<&Uuid>) -> Result<Vec<Checkpoint>, RepositoryError> {
        let mut all = self.read_all().await?;
        if let Some(run_id) = run_id {
            all.retain(|cp| cp.run_id == *run_id);
        }
        Ok(all)
    }

    async fn latest_for_run(&self, run_id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.list(Some(run_id)).await?.into_iter().next())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn prune(&self, keep: usize) -> Result<usize, RepositoryError> {
        let all = self.read_all().await?;
        let mut removed = 0;
        for id in ids_to_prune(&all, keep) {
            if self.delete(&id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
