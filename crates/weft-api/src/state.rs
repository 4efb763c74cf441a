//! Application state wiring stores together.
//!
//! AppState holds the concrete store instances used by the CLI. The
//! checkpoint store is chosen by `[storage] checkpoint_backend`; timers always
//! live in the SQLite database.

use std::path::PathBuf;
use std::sync::Arc;

use weft_core::repository::{BoxCheckpointStore, InMemoryCheckpointStore};
use weft_infra::config::database_path;
use weft_infra::filesystem::{FileCheckpointStore, checkpoint_dir};
use weft_infra::sqlite::{DatabasePool, SqliteCheckpointStore, SqliteTimerStore};
use weft_types::config::{CheckpointBackend, EngineConfig};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    pub checkpoints: Arc<BoxCheckpointStore>,
    pub timers: Arc<SqliteTimerStore>,
}

impl AppState {
    /// Initialize the application state: connect to DB, open stores.
    pub async fn init(data_dir: PathBuf, config: EngineConfig) -> anyhow::Result<Self> {
        let storage_dir = config
            .storage
            .data_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or(data_dir);

        // Ensure data directory exists
        tokio::fs::create_dir_all(&storage_dir).await?;

        let db_pool = DatabasePool::open(&database_path(&storage_dir, &config)).await?;

        let checkpoints = match config.storage.checkpoint_backend {
            CheckpointBackend::Sqlite => {
                BoxCheckpointStore::new(SqliteCheckpointStore::new(db_pool.clone()))
            }
            CheckpointBackend::File => {
                let store = FileCheckpointStore::open(checkpoint_dir(&storage_dir)).await?;
                BoxCheckpointStore::new(store)
            }
            CheckpointBackend::Memory => BoxCheckpointStore::new(InMemoryCheckpointStore::new()),
        };
        tracing::debug!(
            data_dir = %storage_dir.display(),
            backend = ?config.storage.checkpoint_backend,
            "stores ready"
        );

        Ok(Self {
            timers: Arc::new(SqliteTimerStore::new(db_pool)),
            checkpoints: Arc::new(checkpoints),
            config,
            data_dir: storage_dir,
        })
    }
}
