//! Token snapshot file
//!
//! Persists [`TokenRecord`] snapshots as JSON so the CLI can reuse tokens
//! across runs. The cache itself never writes anything; this is one sink for
//! [`super::TokenManager::save`].

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::token::TokenRecord;
use crate::{Error, Result};

/// JSON file holding every cached record
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Snapshot file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file in the default location (~/.oauth-tokens/tokens.json)
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
        Ok(Self::new(home.join(".oauth-tokens").join("tokens.json")))
    }

    /// Location of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record; a missing file is an empty snapshot
    pub fn load(&self) -> Result<Vec<TokenRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No token snapshot found");
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token snapshot");
                return Err(e.into());
            }
        };

        let records: Vec<TokenRecord> = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), count = records.len(), "Loaded token snapshot");
        Ok(records)
    }

    /// Write every record, replacing the previous snapshot
    pub fn save(&self, records: &[TokenRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(records)?;

        // Write next to the target and rename so readers never see a torn file
        let staging = self.path.with_extension("json.tmp");
        let mut file = staging_file(&staging)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&staging, &self.path)?;

        info!(path = %self.path.display(), count = records.len(), "Saved token snapshot");
        Ok(())
    }
}

/// Open the staging file owner read/write only, before any data is written
#[cfg(unix)]
fn staging_file(path: &Path) -> Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; a leftover staging file keeps its bits
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn staging_file(path: &Path) -> Result<fs::File> {
    Ok(OpenOptions::new().write(true).create(true).truncate(true).open(path)?)
}
