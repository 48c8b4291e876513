#![cfg_attr(docsrs, feature(doc_cfg))]

//! Static file serving with support for precompressed variants
//!
//! A [`FileServer`] serves files from a [`Storage`] backend, much like a plain
//! static file handler. When a file such as `app.js` has a sibling compressed
//! ahead of time (`app.js.br`, `app.js.gz`) and the client's `Accept-Encoding`
//! allows it, the sibling is sent instead, with the matching
//! `Content-Encoding`. Directory listings are not supported.
//!
//! ```no_run
//! use precompressed::{Dir, FileServer};
//!
//! # async fn run() -> std::io::Result<()> {
//! let files = FileServer::new(Dir::new("public")?);
//! let req = precompressed::http::Request::get("/app.js").body(()).unwrap();
//! let rsp = files.serve(&req).await;
//! # Ok(())
//! # }
//! ```

pub use http;

mod body;
pub use body::Body;

pub mod encoding;
pub use encoding::{Encoding, Encodings};

mod file_server;
pub use file_server::{FileServer, Selected};

#[cfg(feature = "hyper")]
#[cfg_attr(docsrs, doc(cfg(feature = "hyper")))]
pub mod hyper;

pub mod negotiate;

pub mod path;

pub mod responder;
pub use responder::{Content, ContentResponder, ServeContent};

pub mod storage;
pub use storage::{Bundle, Dir, Storage};
