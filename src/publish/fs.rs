use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use super::{ObjectStore, StoreRequest};

/// Stores snapshots as `{root}/{key}.jpg`.
#[derive(Clone, Debug)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create storage root {}", root.display()))?;
        Ok(Self { root })
    }

    /// Location of the object stored under `key`.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = PathBuf::from(format!("{}.jpg", key));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow!("storage key escapes the storage root: {}", key));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for FilesystemObjectStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn store(&self, request: &StoreRequest<'_>) -> Result<String> {
        let key = request.storage_key();
        let path = self.object_path(&key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create storage dir {}", parent.display()))?;
        }
        write_atomic(&path, request.jpeg)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(key)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
