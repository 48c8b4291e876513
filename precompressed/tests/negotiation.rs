use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use http_body_util::BodyExt;
use precompressed::http::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, IF_MODIFIED_SINCE, IF_UNMODIFIED_SINCE,
    LAST_MODIFIED, RANGE,
};
use precompressed::http::{HeaderMap, Method, StatusCode};
use precompressed::storage::{Error, Opened};
use precompressed::{Bundle, Encoding, Encodings, FileServer, Storage};

fn modified() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000)
}

fn bundle() -> Bundle {
    Bundle::new()
        .with_file("/app.js", "plain", Some(modified()))
        .with_file("/app.js.gz", "gzip", Some(modified()))
        .with_file("/app.js.br", "brotli", Some(modified()))
        .with_file("/only-gzip.css", "plain", Some(modified()))
        .with_file("/only-gzip.css.gz", "gzip", Some(modified()))
        .with_file("/orphan.txt.gz", "gzip", Some(modified()))
}

fn headers(accept: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(accept) = accept {
        headers.insert(ACCEPT_ENCODING, accept.parse().unwrap());
    }
    headers
}

async fn selected<S: Storage>(
    files: &FileServer<S>,
    path: &str,
    accept: Option<&str>,
) -> Option<String> {
    files
        .find(path, &headers(accept))
        .await
        .unwrap()
        .encoding
        .map(|encoding| encoding.name().to_owned())
}

#[tokio::test]
async fn wildcard_prefers_brotli() {
    let files = FileServer::new(bundle());
    assert_eq!(selected(&files, "/app.js", Some("*")).await.as_deref(), Some("br"));
    assert_eq!(selected(&files, "/app.js", Some("gzip, deflate, br")).await.as_deref(), Some("br"));
}

#[tokio::test]
async fn client_weights_win() {
    let files = FileServer::new(bundle());
    for (accept, expected) in [
        ("gzip, deflate, br;q=0.5", Some("gzip")),
        ("br;q=0.1, gzip;q=0.2", Some("gzip")),
        ("identity, br;q=0.9", None),
        ("gzip;q=0, br;q=0", None),
    ] {
        let encoding = selected(&files, "/app.js", Some(accept)).await;
        assert_eq!(encoding.as_deref(), expected, "{accept}");
    }
}

#[tokio::test]
async fn zero_weight_overrides_wildcard() {
    let files = FileServer::new(bundle());
    assert_eq!(selected(&files, "/app.js", Some("gzip;q=0,*")).await.as_deref(), Some("br"));
    assert_eq!(selected(&files, "/only-gzip.css", Some("gzip;q=0,*")).await, None);
    assert_eq!(selected(&files, "/app.js", Some("br;q=0,*")).await.as_deref(), Some("gzip"));
}

#[tokio::test]
async fn preferred_but_missing() {
    // The client prefers brotli, but only a gzip variant exists
    let files = FileServer::new(bundle());
    let accept = Some("br, gzip;q=0.5");
    assert_eq!(selected(&files, "/only-gzip.css", accept).await.as_deref(), Some("gzip"));
}

#[tokio::test]
async fn no_header_no_encoding() {
    let files = FileServer::new(bundle());
    assert_eq!(selected(&files, "/app.js", None).await, None);
}

#[tokio::test]
async fn variant_without_original() {
    let files = FileServer::new(bundle());
    assert_eq!(selected(&files, "/orphan.txt", Some("gzip")).await.as_deref(), Some("gzip"));
    assert!(matches!(files.find("/orphan.txt", &headers(None)).await, Err(Error::NotFound)));

    // Identity is ranked first but cannot be opened, so gzip is next
    let accept = Some("identity, gzip;q=0.5");
    assert_eq!(selected(&files, "/orphan.txt", accept).await.as_deref(), Some("gzip"));
}

#[tokio::test]
async fn custom_encodings() {
    let zstd_bundle = bundle().with_file("/app.js.zst", "zstd", None);
    let files = FileServer::new(zstd_bundle)
        .with_encodings(Encodings::new([Encoding::ZSTD, Encoding::BROTLI, Encoding::GZIP]));
    assert_eq!(selected(&files, "/app.js", Some("*")).await.as_deref(), Some("zstd"));

    let files = FileServer::new(bundle()).with_encodings(Encodings::new([Encoding::GZIP]));
    assert_eq!(selected(&files, "/app.js", Some("br, gzip;q=0.1")).await.as_deref(), Some("gzip"));
}

#[tokio::test]
async fn selected_file_path() {
    let files = FileServer::new(bundle());
    let selected = files.find("/app.js", &headers(Some("gzip"))).await.unwrap();
    assert_eq!(selected.file_path(), "/app.js.gz");
    assert_eq!(selected.path, "/app.js");
    assert_eq!(selected.opened.len, 4);
}

/// Claims brotli variants exist, but fails to open them
struct Flaky(Bundle);

#[async_trait]
impl Storage for Flaky {
    async fn exists(&self, path: &str) -> bool {
        path.ends_with(".br") || self.0.exists(path).await
    }

    async fn open(&self, path: &str) -> Result<Opened, Error> {
        match path.ends_with(".br") {
            true => Err(Error::Io(io::ErrorKind::PermissionDenied.into())),
            false => self.0.open(path).await,
        }
    }
}

#[tokio::test]
async fn open_failure_tries_next() {
    let files = FileServer::new(Flaky(bundle()));
    assert_eq!(selected(&files, "/app.js", Some("br, gzip;q=0.5")).await.as_deref(), Some("gzip"));
    assert_eq!(selected(&files, "/app.js", Some("br")).await, None);

    let rsp = files.respond(&Method::GET, "/app.js", &headers(Some("br"))).await;
    assert_eq!(rsp.status(), StatusCode::OK);
    assert!(!rsp.headers().contains_key(CONTENT_ENCODING));
    let body = rsp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"plain");
}

/// Counts existence checks
struct Counting {
    inner: Bundle,
    probes: AtomicUsize,
}

#[async_trait]
impl Storage for Counting {
    async fn exists(&self, path: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(path).await
    }

    async fn open(&self, path: &str) -> Result<Opened, Error> {
        self.inner.open(path).await
    }
}

#[tokio::test]
async fn no_probing_without_header() {
    let files = FileServer::new(Counting {
        inner: bundle(),
        probes: AtomicUsize::new(0),
    });

    files.find("/app.js", &headers(None)).await.unwrap();
    assert_eq!(files.storage().probes.load(Ordering::SeqCst), 0);

    files.find("/app.js", &headers(Some("gzip"))).await.unwrap();
    assert_eq!(files.storage().probes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn range_leaves_length_to_responder() {
    let files = FileServer::new(bundle());
    let mut headers = headers(Some("br"));
    headers.insert(RANGE, "bytes=1-2".parse().unwrap());
    let rsp = files.respond(&Method::GET, "/app.js", &headers).await;
    assert_eq!(rsp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(rsp.headers()[CONTENT_ENCODING], "br");
    assert_eq!(rsp.headers()[CONTENT_LENGTH], "2");
    let body = rsp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ro");

    headers.insert(RANGE, "bytes=10-".parse().unwrap());
    let rsp = files.respond(&Method::GET, "/app.js", &headers).await;
    assert_eq!(rsp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn conditional_requests() {
    let files = FileServer::new(bundle());
    let rsp = files.respond(&Method::GET, "/app.js", &headers(Some("gzip"))).await;
    let last_modified = rsp.headers()[LAST_MODIFIED].clone();
    assert_eq!(last_modified, httpdate::fmt_http_date(modified()).as_str());

    let mut headers = headers(Some("gzip"));
    headers.insert(IF_MODIFIED_SINCE, last_modified.clone());
    let rsp = files.respond(&Method::GET, "/app.js", &headers).await;
    assert_eq!(rsp.status(), StatusCode::NOT_MODIFIED);
    assert!(!rsp.headers().contains_key(CONTENT_ENCODING));

    let earlier = httpdate::fmt_http_date(modified() - Duration::from_secs(60));
    let mut headers = self::headers(None);
    headers.insert(IF_UNMODIFIED_SINCE, earlier.parse().unwrap());
    let rsp = files.respond(&Method::GET, "/app.js", &headers).await;
    assert_eq!(rsp.status(), StatusCode::PRECONDITION_FAILED);
}
