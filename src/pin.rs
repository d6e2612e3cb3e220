//! Content-pinning collaborator: stores uploaded bytes, hands back a hash.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::hash::ContentHash;

#[derive(Debug, Error)]
pub enum PinError {
    #[error("nothing to pin")]
    Empty,

    #[error("pin store error: {0}")]
    Fs(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pinned {
    pub hash: ContentHash,
    pub size: u64,
}

pub trait ContentPinner: Send + Sync {
    fn pin(&self, file_name: &str, bytes: &[u8]) -> Result<Pinned, PinError>;
}

/// Keeps pinned content in a local directory, one file per blake3 hash.
///
/// Pinning the same bytes twice is a no-op returning the same hash.
pub struct LocalPinner {
    dir: PathBuf,
}

impl LocalPinner {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, PinError> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn path_of(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(hash.as_str())
    }
}

impl ContentPinner for LocalPinner {
    fn pin(&self, file_name: &str, bytes: &[u8]) -> Result<Pinned, PinError> {
        if bytes.is_empty() {
            return Err(PinError::Empty);
        }
        let hash = ContentHash::from_bytes(bytes);
        let path = self.path_of(&hash);
        if !path.exists() {
            std::fs::write(&path, bytes)?;
            log::info!("pinned {file_name} as {hash} ({} bytes)", bytes.len());
        }
        Ok(Pinned {
            hash,
            size: bytes.len() as u64,
        })
    }
}
