use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::{io, mem};

use bytes::{Buf, Bytes, BytesMut};
use http_body::{Frame, SizeHint};
use pin_project::pin_project;
use tokio::io::{AsyncReadExt, Take};
use tokio_util::io::poll_read_buf;

use crate::storage::FileHandle;

const CHUNK_SIZE: usize = 64 * 1024;

/// Response body produced by a `FileServer`
///
/// Either a buffer held in memory or a window of an opened file, which is
/// streamed in chunks and closed once the body is dropped.
#[pin_project]
pub struct Body {
    #[pin]
    inner: InnerBody,
    remaining: u64,
    done: bool,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            inner: InnerBody::Bytes(Bytes::new()),
            remaining: 0,
            done: true,
        }
    }

    /// Stream `len` bytes from the current position of `file`
    pub fn file(file: FileHandle, len: u64) -> Self {
        Self {
            inner: InnerBody::File(file.take(len)),
            remaining: len,
            done: len == 0,
        }
    }
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        let reader = match this.inner.project() {
            PinnedBody::Bytes(bytes) => {
                *this.done = true;
                *this.remaining = 0;
                let bytes = mem::take(bytes.get_mut());
                return Poll::Ready(match bytes.has_remaining() {
                    true => Some(Ok(Frame::data(bytes))),
                    false => None,
                });
            }
            PinnedBody::File(reader) => reader,
        };

        let capacity = Ord::min(*this.remaining, CHUNK_SIZE as u64) as usize;
        let mut buf = BytesMut::with_capacity(capacity);
        match ready!(poll_read_buf(reader, cx, &mut buf)) {
            Ok(0) => {
                *this.done = true;
                match *this.remaining {
                    0 => Poll::Ready(None),
                    // The file was truncated after it was opened
                    _ => Poll::Ready(Some(Err(io::ErrorKind::UnexpectedEof.into()))),
                }
            }
            Ok(n) => {
                *this.remaining = this.remaining.saturating_sub(n as u64);
                if *this.remaining == 0 {
                    *this.done = true;
                }
                Poll::Ready(Some(Ok(Frame::data(buf.freeze()))))
            }
            Err(error) => {
                *this.done = true;
                Poll::Ready(Some(Err(error)))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        match (self.done, &self.inner) {
            (true, _) => SizeHint::with_exact(0),
            (false, InnerBody::Bytes(body)) => SizeHint::with_exact(body.len() as u64),
            (false, InnerBody::File(_)) => SizeHint::with_exact(self.remaining),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Self::from(Bytes::from(data))
    }
}

impl From<String> for Body {
    fn from(data: String) -> Self {
        Self::from(Bytes::from(data))
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Self::from(Bytes::from(data))
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self {
            done: !data.has_remaining(),
            remaining: data.len() as u64,
            inner: InnerBody::Bytes(data),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

#[pin_project(project = PinnedBody)]
enum InnerBody {
    Bytes(#[pin] Bytes),
    File(#[pin] Take<FileHandle>),
}
