//! # HTTP Server
//!
//! HTTP/1 server built on Hyper and Tokio.
//!
//! ## Key Features
//!
//! - One task per connection, one blocking worker per request dispatch
//! - Body size limit enforced before dispatch (413)
//! - Graceful shutdown on Ctrl-C: stop accepting, let in-flight requests
//!   finish, give up after `shutdown_timeout`

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::router::{Method, Router};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3333).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Derive server settings from the application config
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `host:port` does not resolve.
    pub fn from_app_config(app: &AppConfig) -> Result<Self> {
        let address = (app.host.as_str(), app.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| Error::Config {
                key: "HOST".to_string(),
                reason: format!("cannot resolve '{}'", app.address()),
            })?;

        Ok(Self {
            address,
            max_body_size: app.max_body_size,
            shutdown_timeout: app.shutdown_timeout,
            ..Self::default()
        })
    }
}

/// HTTP server over a [`Dispatcher`]
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Create a server
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Server with default settings and no middleware
    #[must_use]
    pub fn with_router(router: Arc<Router>) -> Self {
        Self::new(ServerConfig::default(), Dispatcher::new(router))
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The dispatcher, for middleware registration
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The route table
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        self.dispatcher.router()
    }

    /// Compile the route table
    pub fn commit(&self) {
        self.router().commit();
    }

    /// Bind the configured address and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the address cannot be bound.
    pub async fn serve(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve_on(listener, shutdown_signal()).await
    }

    fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.address;
        let bind_error = |source: std::io::Error| Error::BindError {
            address: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        socket.listen(1024).map_err(bind_error)
    }

    /// Serve connections from `listener` until `shutdown` completes
    ///
    /// Failed accepts are logged and retried; they never stop the loop.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok` once shutdown has drained.
    pub async fn serve_on<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if !self.router().is_committed() {
            warn!("Serving an uncommitted route table, lookups use the linear fallback");
        }
        if let Ok(addr) = listener.local_addr() {
            info!("Server listening on http://{}", addr);
        }

        let active = Arc::new(AtomicUsize::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            let delay = accept_retry_delay(&err);
                            warn!(retry_in = ?delay, "Failed to accept connection: {}", err);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let active = Arc::clone(&active);
                    let mut stop_rx = stop_rx.clone();
                    let keep_alive = self.config.keep_alive;
                    let max_body_size = self.config.max_body_size;

                    active.fetch_add(1, Ordering::SeqCst);
                    tokio::task::spawn(async move {
                        let service = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            async move {
                                Ok::<_, Infallible>(
                                    handle_request(req, dispatcher, remote_addr, max_body_size).await,
                                )
                            }
                        });
                        let conn = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service);
                        tokio::pin!(conn);

                        tokio::select! {
                            result = conn.as_mut() => {
                                if let Err(err) = result {
                                    debug!("Error serving connection: {:?}", err);
                                }
                            }
                            _ = stop_rx.changed() => {
                                conn.as_mut().graceful_shutdown();
                                if let Err(err) = conn.as_mut().await {
                                    debug!("Error draining connection: {:?}", err);
                                }
                            }
                        }
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let _ = stop_tx.send(true);
        let drain = async {
            while active.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                connections = active.load(Ordering::SeqCst),
                "Shutdown timeout elapsed with connections still open"
            );
        }
        info!("Server stopped");
        Ok(())
    }

    /// Dispatch a request in-process, without the network stack
    #[must_use]
    pub fn test_request(
        &self,
        method: Method,
        path: &str,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Response {
        if let Some(actual) = body.as_ref().map(Bytes::len) {
            if actual > self.config.max_body_size {
                return error_response(&Error::PayloadTooLarge {
                    limit: self.config.max_body_size,
                    actual,
                });
            }
        }
        let request = Request::new(method, path, headers, body)
            .with_remote_addr(([127, 0, 0, 1], 0).into());
        self.dispatcher.dispatch(request)
    }
}

/// Pause before the next accept after `err`
///
/// Errors tied to a single peer retry at once; resource exhaustion such as
/// `EMFILE` backs off so the loop does not spin.
fn accept_retry_delay(err: &std::io::Error) -> Duration {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused => {
            Duration::ZERO
        }
        _ => Duration::from_millis(100),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl-C handler: {}", err);
        std::future::pending::<()>().await;
    }
}

async fn handle_request(
    req: hyper::Request<Incoming>,
    dispatcher: Arc<Dispatcher>,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> hyper::Response<Full<Bytes>> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let version = req.version();

    let response = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(request) => {
            let request = request.with_remote_addr(remote_addr);
            match tokio::task::spawn_blocking(move || dispatcher.dispatch(request)).await {
                Ok(response) => response,
                Err(err) => {
                    error!(method = %method, path = %path, "Dispatch worker failed: {}", err);
                    error_response(&Error::other(err))
                }
            }
        }
        Err(err) => {
            warn!(method = %method, path = %path, "Rejected request: {}", err);
            error_response(&err)
        }
    };

    info!(
        "    {} - \"{} {} {:?}\" {} ({}us)",
        remote_addr,
        method,
        path,
        version,
        response.status_code(),
        start.elapsed().as_micros()
    );
    response.into_hyper()
}

fn error_response(err: &Error) -> Response {
    let status = err.status();
    let message = if err.is_client_facing() {
        err.to_string()
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
            .canonical_reason()
            .unwrap_or("Internal Server Error")
            .to_string()
    };
    let mut response = Response::new();
    response.write_error(status, &message);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn echo_router() -> Arc<Router> {
        let router = Arc::new(Router::new());
        router
            .get("/echo/:name", |ctx| {
                let name = ctx.param("name").unwrap_or_default().to_string();
                ctx.response.json(&serde_json::json!({ "name": name }))
            })
            .unwrap();
        router
            .post("/upload", |ctx| {
                let size = ctx.request.body_bytes().map_or(0, <[u8]>::len);
                ctx.response.json(&serde_json::json!({ "size": size }))
            })
            .unwrap();
        router.commit();
        router
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 3333);
        assert!(config.keep_alive);
    }

    #[test]
    fn test_server_config_from_app_config() {
        let app = AppConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            max_body_size: 10,
            ..AppConfig::default()
        };
        let config = ServerConfig::from_app_config(&app).unwrap();
        assert_eq!(config.address, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_body_size, 10);
    }

    #[test]
    fn test_in_process_request() {
        let server = Server::with_router(echo_router());
        let response = server.test_request(Method::Get, "/echo/john", HashMap::new(), None);
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body().as_ref(), br#"{"name":"john"}"#);
    }

    #[test]
    fn test_in_process_payload_too_large() {
        let config = ServerConfig {
            max_body_size: 4,
            ..ServerConfig::default()
        };
        let server = Server::new(config, Dispatcher::new(echo_router()));
        let response = server.test_request(
            Method::Post,
            "/upload",
            HashMap::new(),
            Some(Bytes::from_static(b"too large")),
        );
        assert_eq!(response.status_code(), 413);
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    async fn spawn_server(
        config: ServerConfig,
    ) -> (
        SocketAddr,
        oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let server = Arc::new(Server::new(config, Dispatcher::new(echo_router())));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            server
                .serve_on(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });
        (addr, stop_tx, handle)
    }

    fn small_body_config() -> ServerConfig {
        ServerConfig {
            max_body_size: 4,
            shutdown_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let (addr, stop_tx, handle) = spawn_server(ServerConfig::default()).await;

        let ok = raw_request(
            addr,
            "GET /echo/john HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(ok.starts_with("HTTP/1.1 200"), "{ok}");
        let body = ok.split("\r\n\r\n").nth(1).unwrap();
        let json: Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["name"], "john");

        let missing = raw_request(
            addr,
            "GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");
        assert!(missing.contains(r#""status":404"#));

        stop_tx.send(()).unwrap();
        let result = handle.await.unwrap();
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_serve_rejects_large_body() {
        let (addr, stop_tx, handle) = spawn_server(small_body_config()).await;

        let response = raw_request(
            addr,
            "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 9\r\nConnection: close\r\n\r\ntoo large",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 413"), "{response}");

        stop_tx.send(()).unwrap();
        tokio_test::assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_serve_limits_chunked_body() {
        let (addr, stop_tx, handle) = spawn_server(small_body_config()).await;

        let small = raw_request(
            addr,
            "POST /upload HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n2\r\nok\r\n0\r\n\r\n",
        )
        .await;
        assert!(small.starts_with("HTTP/1.1 200"), "{small}");
        assert!(small.contains(r#"{"size":2}"#), "{small}");

        let large = raw_request(
            addr,
            "POST /upload HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n",
        )
        .await;
        assert!(large.starts_with("HTTP/1.1 413"), "{large}");
        assert!(large.contains(r#""status":413"#), "{large}");

        stop_tx.send(()).unwrap();
        tokio_test::assert_ok!(handle.await.unwrap());
    }

    #[test]
    fn test_accept_retry_delay() {
        use std::io::{Error as IoError, ErrorKind};

        let reset = IoError::from(ErrorKind::ConnectionReset);
        assert_eq!(accept_retry_delay(&reset), Duration::ZERO);

        let exhausted = IoError::from_raw_os_error(24);
        assert!(accept_retry_delay(&exhausted) > Duration::ZERO);
    }
}
