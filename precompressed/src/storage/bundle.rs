use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use walkdir::{DirEntry, WalkDir};

use super::{relative, Error, FileHandle, Opened, Storage};
use crate::path::clean;

/// Serves files held in memory
///
/// Files are keyed by their cleaned path. Directories are not stored
/// explicitly: any prefix of a file path is a directory, and opening it fails
/// just like it does for a `Dir`.
#[derive(Clone, Debug, Default)]
pub struct Bundle {
    files: BTreeMap<String, BundledFile>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every regular file below `root` into memory
    ///
    /// Symbolic links are followed like `Dir` follows them: only while their
    /// target stays inside `root`. Dangling links, link cycles and files whose
    /// names are not valid UTF-8 are skipped.
    pub fn from_dir(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root)?;
        let inside = |entry: &DirEntry| match std::fs::canonicalize(entry.path()) {
            Ok(target) => target.starts_with(&root),
            Err(_) => false,
        };

        let mut bundle = Self::new();
        let entries = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_entry(inside);
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) if error.loop_ancestor().is_some() => continue,
                Err(error) if is_dangling(&error) => continue,
                Err(error) => return Err(error.into()),
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };

            let segments = relative
                .components()
                .map(|component| component.as_os_str().to_str())
                .collect::<Option<Vec<_>>>();
            let Some(segments) = segments else {
                continue;
            };

            let modified = entry.metadata()?.modified().ok();
            let data = std::fs::read(entry.path())?;
            bundle.insert(&segments.join("/"), data, modified);
        }

        Ok(bundle)
    }

    pub fn insert(&mut self, path: &str, data: impl Into<Bytes>, modified: Option<SystemTime>) {
        let mut key = clean(path);
        if key.len() > 1 && key.ends_with('/') {
            key.pop();
        }

        self.files.insert(
            key,
            BundledFile {
                data: data.into(),
                modified,
            },
        );
    }

    pub fn with_file(
        mut self,
        path: &str,
        data: impl Into<Bytes>,
        modified: Option<SystemTime>,
    ) -> Self {
        self.insert(path, data, modified);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn lookup(&self, path: &str) -> Entry<'_> {
        let relative = match relative(path) {
            Some("") => return Entry::Directory,
            Some(relative) => relative,
            None => return Entry::Missing,
        };

        let key = format!("/{relative}");
        if let Some(file) = self.files.get(&key) {
            return Entry::File(file);
        }

        let prefix = format!("{key}/");
        match self
            .files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(name, _)| name.starts_with(&prefix))
        {
            true => Entry::Directory,
            false => Entry::Missing,
        }
    }
}

#[async_trait]
impl Storage for Bundle {
    async fn exists(&self, path: &str) -> bool {
        matches!(self.lookup(path), Entry::File(_))
    }

    async fn open(&self, path: &str) -> Result<Opened, Error> {
        match self.lookup(path) {
            Entry::File(file) => Ok(Opened {
                file: FileHandle::memory(file.data.clone()),
                len: file.data.len() as u64,
                modified: file.modified,
            }),
            Entry::Directory => Err(Error::IsDirectory),
            Entry::Missing => Err(Error::NotFound),
        }
    }
}

fn is_dangling(error: &walkdir::Error) -> bool {
    let kind = error.io_error().map(io::Error::kind);
    kind == Some(io::ErrorKind::NotFound)
}

#[derive(Clone, Debug)]
struct BundledFile {
    data: Bytes,
    modified: Option<SystemTime>,
}

enum Entry<'a> {
    File(&'a BundledFile),
    Directory,
    Missing,
}
