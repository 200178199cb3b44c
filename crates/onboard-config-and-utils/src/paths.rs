//! File system paths for the onboard client.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths (`~/.onboard` by default).
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.onboard`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".onboard"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// `<base>/config.json`
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// `<base>/session.json`, the cached auth session.
    pub fn session_file(&self) -> PathBuf {
        self.base_dir.join("session.json")
    }

    /// `<base>/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// `<base>/logs/onboard.jsonl`
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("onboard.jsonl")
    }

    /// Ensure the base and logs directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_layout() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/onboard-test"));
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/onboard-test/config.json")
        );
        assert_eq!(
            paths.session_file(),
            PathBuf::from("/tmp/onboard-test/session.json")
        );
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/tmp/onboard-test/logs/onboard.jsonl")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_tree() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("nested"));

        paths.ensure_dirs().unwrap();
        assert!(paths.base_dir().exists());
        assert!(paths.logs_dir().exists());
    }
}
