//! File-backed persistence of the current session.

use crate::{GatewayError, GatewayResult, Session};
use std::io::Write;
use std::path::PathBuf;

/// Stores the session as JSON so a later process can resume it.
#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the cached session. A corrupt file is discarded.
    pub fn load(&self) -> GatewayResult<Option<Session>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GatewayError::Storage(e.to_string())),
        };

        match serde_json::from_str::<Session>(&content) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding unreadable session cache");
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn store(&self, session: &Session) -> GatewayResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GatewayError::Storage(e.to_string()))?;
        }

        let content = serde_json::to_vec_pretty(session)?;

        let mut options = std::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&self.path)
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        file.write_all(&content)
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn clear(&self) -> GatewayResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GatewayError::Storage(e.to_string())),
        }
    }
}
