use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, RANGE, VARY};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use tracing::{debug, trace};

use crate::body::Body;
use crate::encoding::{Encoding, Encodings};
use crate::negotiate::AcceptEncoding;
use crate::path::clean;
use crate::responder::{Content, ContentResponder, ServeContent};
use crate::storage::{self, Opened, Storage};

/// Serves static files, preferring precompressed variants the client accepts
///
/// For a request for `/app.js`, the server looks for siblings such as
/// `/app.js.br` and `/app.js.gz` in its `Storage`. If the client's
/// `Accept-Encoding` allows one of the variants that exist, that variant is
/// sent with a matching `Content-Encoding`; otherwise `/app.js` itself is sent.
/// Keeping the variants in sync with the original is up to the caller.
///
/// Directory listings are not supported: any path ending in `/` yields a 404,
/// as does a path for which no variant can be opened.
pub struct FileServer<S, R = ServeContent> {
    storage: S,
    encodings: Encodings,
    responder: R,
}

impl<S: Storage> FileServer<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            encodings: Encodings::default(),
            responder: ServeContent,
        }
    }
}

impl<S: Storage, R: ContentResponder> FileServer<S, R> {
    pub fn with_encodings(self, encodings: Encodings) -> Self {
        Self { encodings, ..self }
    }

    pub fn with_responder<T: ContentResponder>(self, responder: T) -> FileServer<S, T> {
        let Self {
            storage, encodings, ..
        } = self;
        FileServer {
            storage,
            encodings,
            responder,
        }
    }

    pub async fn serve<B>(&self, req: &Request<B>) -> Response<Body> {
        self.respond(req.method(), req.uri().path(), req.headers())
            .await
    }

    /// Respond to a request for `path`
    ///
    /// The `path` is taken as it appears in the request URI, so it may still be
    /// percent-encoded. This is useful when the file server is mounted below
    /// some prefix that has already been stripped.
    pub async fn respond(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Response<Body> {
        let path = match percent_decode_str(path).decode_utf8() {
            Ok(path) => clean(&path),
            Err(_) => return error_response(StatusCode::NOT_FOUND),
        };

        // Directory listings are not supported
        if path.ends_with('/') {
            trace!(%path, "refusing directory request");
            return error_response(StatusCode::NOT_FOUND);
        }

        let Selected {
            path,
            encoding,
            opened,
        } = match self.find(&path, headers).await {
            Ok(selected) => selected,
            Err(error) => {
                debug!(%path, %error, "no servable file");
                return error_response(StatusCode::from(&error));
            }
        };

        let mut preset = HeaderMap::new();
        if let Some(encoding) = &encoding {
            if let Ok(value) = HeaderValue::try_from(encoding.name()) {
                preset.insert(CONTENT_ENCODING, value);
            }

            // Length is not computed downstream once an encoding is set; range
            // responses are left entirely to the responder
            if !headers.contains_key(RANGE) {
                preset.insert(CONTENT_LENGTH, HeaderValue::from(opened.len));
            }

            preset.append(VARY, HeaderValue::from_static("Accept-Encoding"));
        }

        self.responder
            .respond(Content {
                method,
                request: headers,
                path: &path,
                opened,
                headers: preset,
            })
            .await
    }

    /// Find the best variant of `path` to serve, given the request `headers`
    ///
    /// `path` must already be cleaned. Without an `Accept-Encoding` header only
    /// `path` itself is tried. Otherwise, the encodings whose siblings exist
    /// are ranked by client preference and opened in turn; a variant that fails
    /// to open is skipped. The unencoded file is the last resort.
    pub async fn find(&self, path: &str, headers: &HeaderMap) -> Result<Selected, storage::Error> {
        let mut base_error = None;
        if let Some(accept) = AcceptEncoding::from_headers(headers) {
            let mut available = Vec::with_capacity(self.encodings.len());
            for encoding in self.encodings.iter() {
                if encoding.is_identity() || self.storage.exists(&encoding.sibling(path)).await {
                    available.push(encoding);
                }
            }

            for encoding in accept.rank(available) {
                let variant = encoding.sibling(path);
                match self.storage.open(&variant).await {
                    Ok(opened) => {
                        trace!(%path, encoding = encoding.name(), "selected variant");
                        return Ok(Selected {
                            path: path.to_owned(),
                            encoding: (!encoding.is_identity()).then(|| encoding.clone()),
                            opened,
                        });
                    }
                    Err(error) if encoding.is_identity() => base_error = Some(error),
                    Err(error) => debug!(path = %variant, %error, "skipping variant"),
                }
            }
        }

        if let Some(error) = base_error {
            return Err(error);
        }

        let opened = self.storage.open(path).await?;
        Ok(Selected {
            path: path.to_owned(),
            encoding: None,
            opened,
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn encodings(&self) -> &Encodings {
        &self.encodings
    }
}

/// The outcome of negotiation for a single request
pub struct Selected {
    /// The cleaned request path
    pub path: String,
    /// `None` when the unencoded file was selected
    pub encoding: Option<Encoding>,
    pub opened: Opened,
}

impl Selected {
    /// Path of the file that was actually opened
    pub fn file_path(&self) -> String {
        match &self.encoding {
            Some(encoding) => encoding.sibling(&self.path),
            None => self.path.clone(),
        }
    }
}

fn error_response(status: StatusCode) -> Response<Body> {
    let reason = status.canonical_reason().unwrap_or_default();
    let mut rsp = Response::new(Body::from(format!("{} {reason}\n", status.as_u16())));
    *rsp.status_mut() = status;
    rsp
}
