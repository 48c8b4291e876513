use std::io::{self, Cursor, SeekFrom};
use std::path::MAIN_SEPARATOR;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

mod bundle;
mod dir;

pub use bundle::Bundle;
pub use dir::Dir;

/// Backend holding the files to serve
///
/// Paths passed to a `Storage` have already been cleaned by the caller: they
/// start with `/` and contain no `.` or `..` segments. Implementations still
/// refuse anything that could resolve outside their root.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether `path` names a regular file
    ///
    /// This is called once per candidate encoding for every request, so it
    /// should avoid opening the file. Any failure is reported as `false`.
    async fn exists(&self, path: &str) -> bool;

    async fn open(&self, path: &str) -> Result<Opened, Error>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn exists(&self, path: &str) -> bool {
        (**self).exists(path).await
    }

    async fn open(&self, path: &str) -> Result<Opened, Error> {
        (**self).open(path).await
    }
}

/// A file opened for reading, along with its metadata
pub struct Opened {
    pub file: FileHandle,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Readable and seekable handle to an opened file
///
/// The handle is owned by a single request; dropping it closes the file.
pub struct FileHandle {
    inner: Handle,
}

impl FileHandle {
    pub(crate) fn disk(file: File) -> Self {
        Self {
            inner: Handle::Disk(file),
        }
    }

    pub(crate) fn memory(data: Bytes) -> Self {
        Self {
            inner: Handle::Memory(Cursor::new(data)),
        }
    }
}

impl AsyncRead for FileHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            Handle::Disk(file) => Pin::new(file).poll_read(cx, buf),
            Handle::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
        }
    }
}

impl AsyncSeek for FileHandle {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        match &mut self.get_mut().inner {
            Handle::Disk(file) => Pin::new(file).start_seek(position),
            Handle::Memory(cursor) => Pin::new(cursor).start_seek(position),
        }
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        match &mut self.get_mut().inner {
            Handle::Disk(file) => Pin::new(file).poll_complete(cx),
            Handle::Memory(cursor) => Pin::new(cursor).poll_complete(cx),
        }
    }
}

enum Handle {
    Disk(File),
    Memory(Cursor<Bytes>),
}

/// Check a cleaned path and return it relative to the storage root
///
/// Host path separators other than `/` are refused, so `a\..\b` cannot be
/// interpreted differently by the filesystem than by the path cleaning.
fn relative(path: &str) -> Option<&str> {
    if MAIN_SEPARATOR != '/' && path.contains(MAIN_SEPARATOR) {
        return None;
    }

    if path.contains('\0') {
        return None;
    }

    let relative = path.trim_start_matches('/');
    match relative.split('/').any(|segment| segment == "..") {
        true => None,
        false => Some(relative),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("file not found")]
    NotFound,
    #[error("path is a directory")]
    IsDirectory,
    #[error("unable to open file: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Error::NotFound,
            _ => Error::Io(error),
        }
    }
}

impl From<&Error> for StatusCode {
    fn from(e: &Error) -> StatusCode {
        use Error::*;
        match e {
            // Clients never learn whether a path is missing, a directory or unreadable
            NotFound | IsDirectory | Io(_) => StatusCode::NOT_FOUND,
        }
    }
}
