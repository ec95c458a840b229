use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use lunette_edge::{EdgeRequest, EdgeResponse, ServeHandler, StaticSiteHandler};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::tls::{self, TlsSetup};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("address {addr} is already in use")]
    AddressInUse { addr: String },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot serve {}: {source}", .path.display())]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

/// Handle returned by [`DevServer::spawn`]. Dropping it also stops the server.
#[derive(Debug)]
pub struct ServerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<Result<(), ServerError>>,
    local_addr: SocketAddr,
    scheme: Scheme,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Stop accepting, let in-flight responses finish and wait for the listener to close.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(ServerError::Join(err)),
        }
    }
}

#[derive(Clone)]
struct ConnectionContext {
    handler: Arc<dyn ServeHandler>,
    tls: Option<TlsAcceptor>,
    header_read_timeout: Option<Duration>,
}

/// A bound listener plus everything needed to answer requests on it.
pub struct DevServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    root: PathBuf,
    context: ConnectionContext,
}

impl fmt::Debug for DevServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevServer")
            .field("local_addr", &self.local_addr)
            .field("root", &self.root)
            .field("scheme", &self.scheme())
            .field("header_read_timeout", &self.context.header_read_timeout)
            .finish()
    }
}

impl DevServer {
    /// Bind the listener and, when TLS is configured, prepare the certificate.
    ///
    /// TLS problems downgrade the server to plain HTTP; only bind and root
    /// errors are returned.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let handler =
            StaticSiteHandler::new(config.site()).map_err(|source| ServerError::InvalidRoot {
                path: config.root.clone(),
                source,
            })?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AddrInUse {
                    ServerError::AddressInUse {
                        addr: config.bind_target(),
                    }
                } else {
                    ServerError::Bind {
                        addr: config.bind_target(),
                        source,
                    }
                }
            })?;
        let local_addr = listener.local_addr()?;
        let root = handler.root().to_path_buf();

        let tls = match &config.tls {
            Some(settings) => match tls::prepare(settings, &root).await {
                TlsSetup::Ready { acceptor, .. } => Some(acceptor),
                TlsSetup::Downgraded(err) => {
                    warn!(
                        target: "lunette::tls",
                        error = %err,
                        "tls unavailable, falling back to plain http; camera access will need localhost"
                    );
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            listener,
            local_addr,
            root,
            context: ConnectionContext {
                handler: Arc::new(handler),
                tls,
                header_read_timeout: config.header_read_timeout,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn scheme(&self) -> Scheme {
        if self.context.tls.is_some() {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> ServerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let local_addr = self.local_addr;
        let scheme = self.scheme();
        let join = tokio::spawn(self.run(shutdown_rx));
        ServerHandle {
            shutdown: shutdown_tx,
            join,
            local_addr,
            scheme,
        }
    }

    /// Serve until `signal` resolves, then shut down gracefully.
    pub async fn serve_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = self.run(shutdown_rx);
        tokio::pin!(run);
        tokio::pin!(signal);

        tokio::select! {
            res = &mut run => return res,
            _ = &mut signal => {
                info!(target: "lunette::http", "shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        }
        run.await
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let scheme = self.scheme();
        let DevServer {
            listener,
            local_addr,
            root,
            context,
        } = self;
        let display_host = if local_addr.ip().is_unspecified() {
            "localhost".to_string()
        } else {
            local_addr.ip().to_string()
        };
        info!(
            target: "lunette::http",
            url = %format!("{scheme}://{display_host}:{}/", local_addr.port()),
            root = %root.display(),
            "serving"
        );

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                res = shutdown.changed() => {
                    match res {
                        Ok(_) => debug!(target: "lunette::http", "listener received shutdown signal"),
                        Err(_) => debug!(target: "lunette::http", "shutdown channel closed; terminating listener"),
                    }
                    break;
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, peer)) => {
                            let context = context.clone();
                            let shutdown = shutdown.clone();
                            connections.spawn(async move {
                                if let Err(err) = handle_connection(stream, peer, context, shutdown).await {
                                    debug!(target: "lunette::http", %peer, error = %err, "connection ended with error");
                                }
                            });
                        }
                        Err(err) => {
                            warn!(target: "lunette::http", error = %err, "tcp accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
                Some(res) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = res {
                        warn!(target: "lunette::http", error = %err, "connection task failed");
                    }
                }
            }
        }

        drop(listener);
        let in_flight = connections.len();
        if in_flight > 0 {
            debug!(target: "lunette::http", in_flight, "waiting for open connections");
        }
        while let Some(res) = connections.join_next().await {
            if let Err(err) = res {
                warn!(target: "lunette::http", error = %err, "connection task failed");
            }
        }
        info!(target: "lunette::http", "server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    debug!(target: "lunette::http", %peer, "accepted connection");
    let Some(acceptor) = context.tls.clone() else {
        return serve_http(stream, peer, context, shutdown).await;
    };

    let handshake = accept_tls(&acceptor, stream, context.header_read_timeout);
    let tls_stream = tokio::select! {
        res = handshake => res?,
        _ = shutdown.changed() => return Ok(()),
    };
    serve_http(tls_stream, peer, context, shutdown).await
}

/// The header read timeout also bounds the handshake, so a client that never
/// sends a ClientHello cannot hold the connection open.
async fn accept_tls(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    timeout: Option<Duration>,
) -> io::Result<tokio_rustls::server::TlsStream<TcpStream>> {
    let handshake = acceptor.accept(stream);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, handshake).await.map_err(|_| {
            io::Error::new(io::ErrorKind::TimedOut, "tls handshake timed out")
        })?,
        None => handshake.await,
    }
}

async fn serve_http<I>(
    io: I,
    peer: SocketAddr,
    context: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let handler = Arc::clone(&context.handler);
    let service = service_fn(move |req: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(respond(handler.as_ref(), req, peer).await) }
    });

    let mut builder = http1::Builder::new();
    if let Some(timeout) = context.header_read_timeout {
        builder.timer(TokioTimer::new()).header_read_timeout(timeout);
    }
    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => return res.map_err(ServerError::from),
            _ = shutdown.changed(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

async fn respond(
    handler: &dyn ServeHandler,
    request: Request<Incoming>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let started = Instant::now();
    let edge_request = EdgeRequest::from_http(&request, peer);
    let method = edge_request.method().clone();
    let target = edge_request.target().to_string();
    drop(request);

    let response = handler.handle(edge_request).await;
    info!(
        target: "lunette::http",
        %peer,
        %method,
        %target,
        status = response.status().as_u16(),
        bytes = response.body().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    convert_edge_to_hyper(response)
}

fn convert_edge_to_hyper(response: EdgeResponse) -> Response<Full<Bytes>> {
    let (status, headers, body) = response.into_parts();
    let mut hyper_response = Response::new(Full::new(body));
    *hyper_response.status_mut() = status;
    *hyper_response.headers_mut() = headers;
    hyper_response
}
