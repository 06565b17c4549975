//! Directory-backed persisted store.
//!
//! One file per key. Filenames are the hex-encoded key so arbitrary key
//! strings map to portable names. Writes go to a temporary file first and are
//! renamed into place, so a crash mid-write leaves the previous value intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::PersistedStore;
use crate::error::SyncResult;

const EXTENSION: &str = "bin";

/// A [`PersistedStore`] writing each key to its own file.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        std::fs::create_dir_all(&path)?;
        let root = path.as_ref().to_path_buf();
        tracing::debug!(path = ?root, "File store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", hex::encode(key.as_bytes()), EXTENSION))
    }
}

#[async_trait]
impl PersistedStore for FileStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> SyncResult<()> {
        let target = self.path_for(key);
        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> SyncResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match hex::decode(stem).ok().and_then(|b| String::from_utf8(b).ok()) {
                Some(key) => keys.push(key),
                None => tracing::warn!(path = ?path, "Ignoring foreign file in store directory"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
