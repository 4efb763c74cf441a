//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::{Path, PathBuf};

use weft_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Path of the SQLite database file for `config`.
///
/// `[storage] database_file` is taken relative to the data directory unless
/// it is absolute.
pub fn database_path(data_dir: &Path, config: &EngineConfig) -> PathBuf {
    data_dir.join(&config.storage.database_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use weft_types::config::CheckpointBackend;
    use weft_types::workflow::CheckpointGranularity;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.executor.max_concurrency, 10);
        assert_eq!(config.storage.checkpoint_backend, CheckpointBackend::Sqlite);
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[executor]
max_concurrency = 4
checkpoint = true
checkpoint_granularity = "per_step"

[timers]
poll_interval_ms = 250

[storage]
checkpoint_backend = "file"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.executor.max_concurrency, 4);
        assert!(config.executor.checkpoint);
        assert_eq!(config.executor.checkpoint_granularity, CheckpointGranularity::PerStep);
        assert_eq!(config.executor.max_iterations, 100);
        assert_eq!(config.timers.poll_interval_ms, 250);
        assert_eq!(config.timers.retention_secs, 86_400);
        assert_eq!(config.storage.checkpoint_backend, CheckpointBackend::File);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.executor.max_concurrency, 10);
    }

    #[test]
    fn database_path_is_relative_to_data_dir() {
        let config = EngineConfig::default();
        assert_eq!(
            database_path(Path::new("/data"), &config),
            PathBuf::from("/data/weft.db")
        );

        let mut absolute = EngineConfig::default();
        absolute.storage.database_file = "/var/lib/weft/engine.db".to_string();
        assert_eq!(
            database_path(Path::new("/data"), &absolute),
            PathBuf::from("/var/lib/weft/engine.db")
        );
    }
}
