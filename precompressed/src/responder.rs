use std::io::SeekFrom;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use http::header::{
    ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE, LAST_MODIFIED, RANGE,
};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use tokio::io::AsyncSeekExt;
use tracing::debug;

use crate::body::Body;
use crate::storage::Opened;

/// Turns an opened file into a response
///
/// A `ContentResponder` takes care of conditional requests, byte ranges and
/// content types. It is handed the logical request path (not the path of a
/// precompressed sibling), so content types follow the original extension.
#[async_trait]
pub trait ContentResponder: Send + Sync {
    async fn respond(&self, content: Content<'_>) -> Response<Body>;
}

/// Everything a `ContentResponder` needs to build a response
pub struct Content<'a> {
    pub method: &'a Method,
    /// Headers of the request
    pub request: &'a HeaderMap,
    /// Cleaned request path
    pub path: &'a str,
    pub opened: Opened,
    /// Headers already decided on, such as `Content-Encoding` and `Vary`
    pub headers: HeaderMap,
}

/// The default `ContentResponder`
///
/// Handles `If-Modified-Since`, `If-Unmodified-Since`, `If-Range` (dates only)
/// and single byte ranges. Requests for multiple ranges get the full content.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServeContent;

#[async_trait]
impl ContentResponder for ServeContent {
    async fn respond(&self, content: Content<'_>) -> Response<Body> {
        let Content {
            method,
            request,
            path,
            opened,
            mut headers,
        } = content;
        let Opened {
            mut file,
            len,
            modified,
        } = opened;

        if !headers.contains_key(CONTENT_TYPE) {
            let mime = mime_guess::from_path(path).first();
            if let Some(value) = mime.and_then(|mime| HeaderValue::try_from(mime.as_ref()).ok()) {
                headers.insert(CONTENT_TYPE, value);
            }
        }

        // The Unix epoch stands in for "unknown" on some storage backends
        let modified = modified.and_then(unix_secs).filter(|secs| *secs > 0);
        if let Some(value) = modified.and_then(http_date) {
            headers.insert(LAST_MODIFIED, value);
        }

        if let Some(modified) = modified {
            if let Some(since) = header_date(request, IF_UNMODIFIED_SINCE) {
                if modified > since {
                    let status = StatusCode::PRECONDITION_FAILED;
                    return response(status, HeaderMap::new(), Body::empty());
                }
            }

            let cacheable = method == Method::GET || method == Method::HEAD;
            if cacheable && !request.contains_key(IF_NONE_MATCH) {
                if let Some(since) = header_date(request, IF_MODIFIED_SINCE) {
                    if modified <= since {
                        headers.remove(CONTENT_TYPE);
                        headers.remove(CONTENT_LENGTH);
                        headers.remove(CONTENT_ENCODING);
                        return response(StatusCode::NOT_MODIFIED, headers, Body::empty());
                    }
                }
            }
        }

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let range = match request.get(RANGE).and_then(|value| value.to_str().ok()) {
            Some(range) if range_allowed(request, modified) => ByteRange::parse(range, len),
            _ => ByteRange::Full,
        };

        let (status, send) = match range {
            ByteRange::Full => {
                if !headers.contains_key(CONTENT_LENGTH) {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                }
                (StatusCode::OK, len)
            }
            ByteRange::Partial { start, end } => {
                if let Err(error) = file.seek(SeekFrom::Start(start)).await {
                    debug!(path, %error, "unable to seek to start of range");
                    return response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        HeaderMap::new(),
                        Body::empty(),
                    );
                }

                let send = end - start + 1;
                if let Ok(value) = HeaderValue::try_from(format!("bytes {start}-{end}/{len}")) {
                    headers.insert(CONTENT_RANGE, value);
                }
                headers.insert(CONTENT_LENGTH, HeaderValue::from(send));
                (StatusCode::PARTIAL_CONTENT, send)
            }
            ByteRange::Unsatisfiable => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::try_from(format!("bytes */{len}")) {
                    headers.insert(CONTENT_RANGE, value);
                }
                return response(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::empty());
            }
        };

        let body = match method == Method::HEAD {
            true => Body::empty(),
            false => Body::file(file, send),
        };

        response(status, headers, body)
    }
}

fn response(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut rsp = Response::new(body);
    *rsp.status_mut() = status;
    *rsp.headers_mut() = headers;
    rsp
}

/// Whether an `If-Range` precondition (if any) allows serving a partial response
fn range_allowed(request: &HeaderMap, modified: Option<u64>) -> bool {
    let Some(value) = request.get(IF_RANGE) else {
        return true;
    };

    // Entity tags never match, as no `ETag` is sent
    let since = value
        .to_str()
        .ok()
        .and_then(|value| httpdate::parse_http_date(value).ok())
        .and_then(unix_secs);
    matches!((modified, since), (Some(modified), Some(since)) if modified == since)
}

fn header_date(headers: &HeaderMap, name: http::header::HeaderName) -> Option<u64> {
    let value = headers.get(name)?.to_str().ok()?;
    unix_secs(httpdate::parse_http_date(value).ok()?)
}

fn http_date(secs: u64) -> Option<HeaderValue> {
    let time = UNIX_EPOCH + std::time::Duration::from_secs(secs);
    HeaderValue::try_from(httpdate::fmt_http_date(time)).ok()
}

fn unix_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|elapsed| elapsed.as_secs())
}

#[derive(Debug, Eq, PartialEq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

impl ByteRange {
    /// Interpret a `Range` header for content of length `len`
    ///
    /// Malformed headers and multiple ranges fall back to the full content.
    fn parse(value: &str, len: u64) -> Self {
        let Some(spec) = value.trim().strip_prefix("bytes=") else {
            return Self::Full;
        };

        if spec.contains(',') {
            return Self::Full;
        }

        let Some((start, end)) = spec.trim().split_once('-') else {
            return Self::Full;
        };

        let (start, end) = (start.trim(), end.trim());
        if start.is_empty() {
            let Ok(suffix) = end.parse::<u64>() else {
                return Self::Full;
            };

            return match (suffix, len) {
                (0, _) | (_, 0) => Self::Unsatisfiable,
                (suffix, len) => Self::Partial {
                    start: len - Ord::min(suffix, len),
                    end: len - 1,
                },
            };
        }

        let Ok(start) = start.parse::<u64>() else {
            return Self::Full;
        };

        if start >= len {
            return Self::Unsatisfiable;
        }

        let end = match end {
            "" => len - 1,
            end => match end.parse::<u64>() {
                Ok(end) if end >= start => Ord::min(end, len - 1),
                _ => return Self::Full,
            },
        };

        Self::Partial { start, end }
    }
}
