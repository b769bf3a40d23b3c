//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Asking every open connection to finish its in-flight requests and close.
//! 3. Waiting at most the shutdown timeout for them, then aborting the rest.
//!
//! Set `terminationGracePeriodSeconds` longer than the shutdown timeout.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::response::Response;
use crate::router::Router;

/// The HTTP server.
#[derive(Clone, Debug)]
pub struct Server {
    addr: SocketAddr,
    read_timeout: Duration,
    write_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. Timeouts default to 5 s (headers), 10 s (request) and 20 s
    /// (shutdown drain).
    pub fn bind(addr: SocketAddr) -> Self {
        Self {
            addr,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(20),
        }
    }

    /// Time allowed for a client to send the request headers (HTTP/1).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Time allowed for one request to produce its response. A request that
    /// takes longer is answered `503` and its handler chain is dropped.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Time allowed for in-flight connections to finish after shutdown starts.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Serves `router` until SIGTERM or Ctrl-C.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Serves `router` until `signal` resolves, then drains.
    pub async fn serve_with_shutdown(
        self,
        router: Router,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let router = Arc::new(router);
        let stop = CancellationToken::new();

        info!(addr = %self.addr, "listening");

        // Every connection task, so shutdown can wait for them.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Shutdown first, so a SIGTERM stops accepting even when more
                // connections are queued.
                biased;

                () = &mut signal => {
                    info!(
                        addr = %self.addr,
                        in_flight = tasks.len(),
                        "shutdown started, draining connections"
                    );
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "accept error");
                            continue;
                        }
                    };

                    tasks.spawn(connection(
                        self.clone(),
                        Arc::clone(&router),
                        TokioIo::new(stream),
                        remote_addr,
                        stop.clone(),
                    ));
                }

                // Reap finished connection tasks so the set does not grow
                // without bound.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        stop.cancel();

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                addr = %self.addr,
                remaining = tasks.len(),
                "shutdown timed out, aborting connections"
            );
            tasks.abort_all();
            return Err(Error::ShutdownTimeout(self.shutdown_timeout));
        }

        info!(addr = %self.addr, "stopped");
        Ok(())
    }
}

/// Drives one connection until it closes, asking it to wind down once `stop`
/// is cancelled.
async fn connection(
    server: Server,
    router: Arc<Router>,
    io: TokioIo<tokio::net::TcpStream>,
    remote_addr: SocketAddr,
    stop: CancellationToken,
) {
    // Called once per request on the connection.
    let write_timeout = server.write_timeout;
    let svc = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
        let router = Arc::clone(&router);
        async move { dispatch(&router, req, remote_addr, write_timeout).await }
    });

    // Auto-detects HTTP/1.1 or HTTP/2, whatever the client speaks.
    let mut builder = ConnBuilder::new(TokioExecutor::new());
    builder.http1().timer(TokioTimer::new()).header_read_timeout(server.read_timeout);

    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut stopping = false;
    let result = loop {
        tokio::select! {
            res = conn.as_mut() => break res,
            () = stop.cancelled(), if !stopping => {
                stopping = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = result {
        error!(peer = %remote_addr, error = %e, "connection error");
    }
}

/// Routes one request under the write timeout.
async fn dispatch<B>(
    router: &Router,
    req: http::Request<B>,
    remote_addr: SocketAddr,
    write_timeout: Duration,
) -> Result<http::Response<Full<Bytes>>, Error>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match tokio::time::timeout(write_timeout, router.serve(req, Some(remote_addr))).await {
        Ok(res) => res,
        Err(_) => {
            warn!(peer = %remote_addr, ?write_timeout, "request timed out");
            Ok(Response::text(StatusCode::SERVICE_UNAVAILABLE, "time out").into_inner())
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. A signal that cannot be installed is
/// logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "installing Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "installing SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    // Never resolves: on non-Unix platforms the SIGTERM arm is disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
