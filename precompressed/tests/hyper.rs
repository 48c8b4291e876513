#![cfg(feature = "hyper")]

use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use precompressed::hyper::Server;
use precompressed::{Dir, FileServer};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use reqwest::StatusCode;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct ServerRunner {
    addr: SocketAddr,
    handle: JoinHandle<Result<(), io::Error>>,
}

impl ServerRunner {
    async fn run() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::new(listener, files());
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.serve());
        Self { addr, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for ServerRunner {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn files() -> FileServer<Dir> {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("testdata");
    FileServer::new(Dir::new(root).unwrap())
}

#[tokio::test]
async fn test_plain() {
    let runner = ServerRunner::run().await;

    let rsp = reqwest::get(runner.url("/file.txt")).await.unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    assert!(rsp.headers().get(CONTENT_ENCODING).is_none());
    assert_eq!(rsp.text().await.unwrap(), "zyxwvutsrqponmlkjihgfedcba\n");
}

#[tokio::test]
async fn test_gzip() {
    let runner = ServerRunner::run().await;

    let rsp = reqwest::Client::new()
        .get(runner.url("/file.txt"))
        .header(ACCEPT_ENCODING, "gzip,*")
        .send()
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    assert_eq!(rsp.headers()[CONTENT_ENCODING], "gzip");
    assert_eq!(rsp.content_length(), Some(47));

    let bytes = rsp.bytes().await.unwrap();
    let mut body = String::new();
    GzDecoder::new(&bytes[..]).read_to_string(&mut body).unwrap();
    assert_eq!(body, "abcdefghijklmnopqrstuvwxyz\n");
}

#[tokio::test]
async fn test_not_found() {
    let runner = ServerRunner::run().await;

    for path in ["/nonexistent.txt", "/", "/sub/"] {
        let rsp = reqwest::get(runner.url(path)).await.unwrap();
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let server = Server::new(listener, files()).with_graceful_shutdown(async move {
        rx.await.ok();
    });
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(server.serve());

    let rsp = reqwest::get(format!("http://{addr}/file2.txt")).await.unwrap();
    assert_eq!(rsp.text().await.unwrap(), "1234567890987654321\n");

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
