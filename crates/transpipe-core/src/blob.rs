//! Disk-backed storage for material files (uploaded originals, rasterized
//! pages, webpage captures, export archives). Path generation is a fast,
//! synchronous operation, I/O is a separate step the caller can run off
//! any lock it's holding. Materials persist for the life of the client's
//! case, so this is a stable directory rather than a temp one.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub trait BlobStore: Send + Sync {
    /// Persist `bytes` under a path derived from `material_id` and
    /// `suffix` (e.g. `"original.jpg"`, `"page_3.jpg"`), returning the
    /// path to record on the material.
    fn save(&self, material_id: &str, suffix: &str, bytes: &[u8]) -> Result<String>;

    /// Read back bytes previously returned by `save`.
    fn load(&self, path: &str) -> Result<Vec<u8>>;

    /// Remove every file for a material, used on material deletion.
    fn delete_all(&self, material_id: &str) -> Result<()>;
}

/// Filesystem-backed `BlobStore` rooted at a configured base directory,
/// one subdirectory per material.
pub struct FsBlobStore {
    base_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn material_dir(&self, material_id: &str) -> PathBuf {
        self.base_dir.join(material_id)
    }
}

impl BlobStore for FsBlobStore {
    fn save(&self, material_id: &str, suffix: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.material_dir(material_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(suffix);
        std::fs::write(&path, bytes)?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>> {
        std::fs::read(Path::new(path)).map_err(|e| Error::Store(format!("failed to read blob {path}: {e}")))
    }

    fn delete_all(&self, material_id: &str) -> Result<()> {
        let dir = self.material_dir(material_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path()).unwrap();
        let path = store.save("mat-1", "original.jpg", b"hello").unwrap();
        assert_eq!(store.load(&path).unwrap(), b"hello");
    }

    #[test]
    fn delete_all_removes_material_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path()).unwrap();
        let path = store.save("mat-1", "original.jpg", b"hello").unwrap();
        store.delete_all("mat-1").unwrap();
        assert!(store.load(&path).is_err());
    }
}
