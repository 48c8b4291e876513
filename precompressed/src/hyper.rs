use std::any::Any;
use std::convert::Infallible;
use std::future::{pending, Future, Pending};
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::{pin, Pin};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{CatchUnwind, FutureExt, Map};
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::body::Body;
use crate::file_server::FileServer;
use crate::responder::{ContentResponder, ServeContent};
use crate::storage::Storage;

pub use hyper::body;

/// Serves a `FileServer` over HTTP/1 and HTTP/2
pub struct Server<S, R = ServeContent, F = Pending<()>> {
    listener: TcpListener,
    files: Arc<FileServer<S, R>>,
    signal: F,
}

impl<S: Storage, R: ContentResponder> Server<S, R, Pending<()>> {
    pub async fn bind(address: SocketAddr, files: FileServer<S, R>) -> Result<Self, io::Error> {
        Ok(Self::new(TcpListener::bind(address).await?, files))
    }

    pub fn new(listener: TcpListener, files: FileServer<S, R>) -> Self {
        Server {
            listener,
            files: Arc::new(files),
            signal: pending(),
        }
    }

    /// Stop accepting connections once `signal` completes
    ///
    /// Connections that are still open are shut down gracefully, and `serve()`
    /// only returns after they have finished.
    pub fn with_graceful_shutdown<F: Future<Output = ()>>(self, signal: F) -> Server<S, R, F> {
        let Server {
            listener, files, ..
        } = self;
        Server {
            listener,
            files,
            signal,
        }
    }
}

impl<S, R, F> Server<S, R, F>
where
    S: Storage + 'static,
    R: ContentResponder + 'static,
    F: Future<Output = ()>,
{
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> Result<(), io::Error> {
        let Server {
            listener,
            files,
            signal,
        } = self;

        let shutdown = CancellationToken::new();
        let connections = TaskTracker::new();
        let mut signal = pin!(signal);
        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(error) if is_transient(&error) => continue,
                    Err(error) => {
                        // Sleep for a bit to see if the error clears
                        error!(%error, "error accepting connection");
                        sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
                _ = signal.as_mut() => {
                    info!("shutdown signal received, draining...");
                    break;
                }
            };

            debug!(%addr, "connection accepted");
            let service = ConnectionService {
                addr,
                files: files.clone(),
            };
            connections.spawn(serve_connection(stream, service, shutdown.clone()));
        }

        drop(listener);
        shutdown.cancel();
        connections.close();
        if !connections.is_empty() {
            debug!("waiting for {} connection(s) to finish", connections.len());
        }
        connections.wait().await;
        Ok(())
    }
}

fn is_transient(error: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        error.kind(),
        ConnectionRefused | ConnectionAborted | ConnectionReset
    )
}

/// Serve requests on `stream` until the client leaves or `shutdown` is cancelled
async fn serve_connection<S, R>(
    stream: TcpStream,
    service: ConnectionService<S, R>,
    shutdown: CancellationToken,
) where
    S: Storage + 'static,
    R: ContentResponder + 'static,
{
    let addr = service.addr;
    let builder = Builder::new(TokioExecutor::new());
    let mut conn = pin!(builder.serve_connection(TokioIo::new(stream), service));

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            debug!(%addr, "shutting down connection");
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(error) = result {
        error!(%addr, %error, "failed to serve connection");
    }
    debug!(%addr, "connection closed");
}

/// Answers every request on a connection from the shared `FileServer`
pub struct ConnectionService<S, R> {
    addr: SocketAddr,
    files: Arc<FileServer<S, R>>,
}

impl<S: Storage + 'static, R: ContentResponder + 'static> Service<Request<Incoming>>
    for ConnectionService<S, R>
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = UnwindSafeHandlerFuture<Self::Response, Self::Error>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let (addr, files) = (self.addr, self.files.clone());
        // Only the head of the request matters for serving files
        let (parts, _) = req.into_parts();
        let future: Pin<Box<dyn Future<Output = Response<Body>> + Send>> = Box::pin(async move {
            let rsp = files
                .respond(&parts.method, parts.uri.path(), &parts.headers)
                .await;
            let status = rsp.status();
            debug!(%addr, method = %parts.method, uri = %parts.uri, %status, "request");
            rsp
        });

        AssertUnwindSafe(future)
            .catch_unwind()
            .map(panic_response as fn(_) -> _)
    }
}

type UnwindSafeHandlerFuture<T, E> = Map<
    CatchUnwind<AssertUnwindSafe<Pin<Box<dyn Future<Output = T> + Send>>>>,
    fn(Result<T, Box<dyn Any + Send + 'static>>) -> Result<T, E>,
>;

fn panic_response(
    result: Result<Response<Body>, Box<dyn Any + Send + 'static>>,
) -> Result<Response<Body>, Infallible> {
    let error = match result {
        Ok(rsp) => return Ok(rsp),
        Err(e) => e,
    };

    let panic_str = if let Some(s) = error.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = error.downcast_ref::<&'static str>() {
        s
    } else {
        "no error"
    };

    error!("caught panic from request handler: {:?}", panic_str);

    let mut rsp = Response::new(Body::from("Caught panic"));
    *rsp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    Ok(rsp)
}
