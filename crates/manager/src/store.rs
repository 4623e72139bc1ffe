//! One-file-per-tunnel persistence.
//!
//! Each [`crate::record::Tunnel`] is stored as a single file named
//! after its identifier, containing the length-prefixed `framing`
//! serialization of the record (the same wire format every other
//! message in the core uses, see `framing::codec`). There is no
//! separate index file: the directory listing *is* the index, so a
//! crash between "write record" and "update index" cannot happen.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::BufReader;
use tracing::warn;

use crate::record::Tunnel;
use crate::{ManagerError, Result};

/// Reads and writes persisted [`Tunnel`] records under a directory.
pub struct Store {
    directory: PathBuf,
}

impl Store {
    /// Opens (creating if necessary) the store rooted at `directory`.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    /// Loads every persisted tunnel record, skipping and logging any
    /// file that fails to parse rather than aborting startup.
    pub async fn load_all(&self) -> Result<Vec<Tunnel>> {
        let mut entries = fs::read_dir(&self.directory).await?;
        let mut tunnels = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match self.read(&path).await {
                Ok(tunnel) => tunnels.push(tunnel),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unparseable tunnel record");
                }
            }
        }
        Ok(tunnels)
    }

    /// Persists `tunnel`, overwriting any existing record with the
    /// same identifier.
    pub async fn save(&self, tunnel: &Tunnel) -> Result<()> {
        let path = self.path_for(&tunnel.identifier);
        let mut encoder = framing::Encoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&mut buffer, tunnel).await?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &buffer).await?;
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    /// Removes the persisted record for `identifier`, if any.
    pub async fn delete(&self, identifier: &str) -> Result<()> {
        let path = self.path_for(identifier);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ManagerError::Io(err)),
        }
    }

    async fn read(&self, path: &Path) -> Result<Tunnel> {
        let file = fs::File::open(path).await?;
        let mut reader = BufReader::new(file);
        let mut decoder = framing::Decoder::new();
        decoder
            .decode(&mut reader)
            .await?
            .ok_or_else(|| ManagerError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "empty tunnel record")))
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        self.directory.join(identifier)
    }
}
