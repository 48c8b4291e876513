use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};

use super::{relative, Error, FileHandle, Opened, Storage};

/// Serves files from a directory on the local filesystem
///
/// Symbolic links are followed, but only as long as their target stays inside
/// the root directory. Directories themselves are never served.
#[derive(Clone, Debug)]
pub struct Dir {
    root: PathBuf,
}

impl Dir {
    /// Create a `Dir` rooted at `root`, which must exist
    ///
    /// An empty path stands for the current directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = match root.as_ref() {
            path if path.as_os_str().is_empty() => Path::new("."),
            path => path,
        };

        Ok(Self {
            root: std::fs::canonicalize(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn resolve(&self, path: &str) -> Result<PathBuf, Error> {
        let relative = relative(path).ok_or(Error::NotFound)?;
        let mut full = self.root.clone();
        full.extend(relative.split('/').filter(|segment| !segment.is_empty()));

        let resolved = fs::canonicalize(&full).await?;
        match resolved.starts_with(&self.root) {
            true => Ok(resolved),
            false => Err(Error::NotFound),
        }
    }
}

#[async_trait]
impl Storage for Dir {
    async fn exists(&self, path: &str) -> bool {
        let Ok(resolved) = self.resolve(path).await else {
            return false;
        };

        match fs::metadata(&resolved).await {
            Ok(metadata) => metadata.is_file(),
            Err(_) => false,
        }
    }

    async fn open(&self, path: &str) -> Result<Opened, Error> {
        let resolved = self.resolve(path).await?;
        let file = File::open(&resolved).await?;
        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(Error::IsDirectory);
        }

        Ok(Opened {
            len: metadata.len(),
            modified: metadata.modified().ok(),
            file: FileHandle::disk(file),
        })
    }
}
