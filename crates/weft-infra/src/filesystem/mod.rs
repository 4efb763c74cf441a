//! Filesystem adapters for weft: the data directory layout and the
//! JSON-file checkpoint store.

pub mod checkpoint;

use std::path::{Path, PathBuf};

pub use checkpoint::FileCheckpointStore;

/// Resolve the data directory.
///
/// Priority:
/// 1. An explicit override (e.g. `[storage] data_dir` or `--data-dir`)
/// 2. `WEFT_DATA_DIR` environment variable
/// 3. `~/.weft`
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(dir) = std::env::var("WEFT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".weft");
    }

    // Last resort: current directory
    PathBuf::from(".weft")
}

/// Directory holding one JSON file per checkpoint: `{data_dir}/checkpoints/`.
pub fn checkpoint_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("checkpoints")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let dir = resolve_data_dir(Some(Path::new("/srv/weft")));
        assert_eq!(dir, PathBuf::from("/srv/weft"));
    }

    #[test]
    fn test_default_ends_with_weft() {
        // WEFT_DATA_DIR may be set by the environment running the tests.
        if std::env::var("WEFT_DATA_DIR").is_err() {
            assert!(resolve_data_dir(None).ends_with(".weft"));
        }
    }

    #[test]
    fn test_checkpoint_dir() {
        assert_eq!(
            checkpoint_dir(Path::new("/data")),
            PathBuf::from("/data/checkpoints")
        );
    }
}
