//! Base endpoint: binds a `RequestHandler` to a TCP or Unix socket listener
//!
//! The endpoint owns the transport plumbing every mock handler shares:
//! mounting under a base path, buffering the body, parsing query arguments,
//! calling the handler hooks in order and turning handler errors into plain
//! text responses so no request is ever left without an answer.

use crate::error::{Error, Result};
use crate::metrics;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use handler::{Args, EndpointContext, Reply, RequestHandler, RequestHead, TEXT_PLAIN_UTF8};
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

/// Where an endpoint listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// TCP/IP listener; `ip` of `None` binds all interfaces.
    Tcp { port: u16, ip: Option<IpAddr> },
    /// Unix domain socket at `path`.
    Unix { path: PathBuf },
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp { port, ip } => {
                let ip = ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
                write!(f, "tcp:{}", SocketAddr::new(ip, *port))
            }
            Transport::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Per-endpoint resource limits.
#[derive(Debug, Clone, Copy)]
pub struct EndpointLimits {
    /// Requests processed concurrently; further requests wait.
    pub max_connections: usize,
    pub max_body_bytes: usize,
}

impl Default for EndpointLimits {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Check that `base_path` can be mounted as a literal route prefix.
///
/// Route patterns treat `{`, `}` and segments led by `:` or `*` as
/// parameters, so those are refused rather than silently matching anything.
pub fn check_base_path(base_path: &str) -> std::result::Result<(), String> {
    if !base_path.starts_with('/') {
        return Err(format!("base_path must start with '/', got: {base_path}"));
    }
    if base_path.contains(['{', '}']) {
        return Err(format!("base_path must not contain '{{' or '}}', got: {base_path}"));
    }
    if base_path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err(format!(
            "base_path segments must not start with ':' or '*', got: {base_path}"
        ));
    }
    Ok(())
}

/// A mock endpoint: handler, shared context, mount point and transport.
pub struct Endpoint {
    handler: Arc<dyn RequestHandler>,
    context: Arc<EndpointContext>,
    base_path: String,
    transport: Transport,
    limits: EndpointLimits,
}

impl Endpoint {
    pub fn new(
        handler: Arc<dyn RequestHandler>,
        context: Arc<EndpointContext>,
        transport: Transport,
    ) -> Self {
        Self {
            handler,
            context,
            base_path: "/".to_string(),
            transport,
            limits: EndpointLimits::default(),
        }
    }

    /// Endpoint listening on TCP `port`, on `ip` or all interfaces.
    pub fn tcp(
        handler: Arc<dyn RequestHandler>,
        context: Arc<EndpointContext>,
        port: u16,
        ip: Option<IpAddr>,
    ) -> Self {
        Self::new(handler, context, Transport::Tcp { port, ip })
    }

    /// Endpoint listening on the Unix socket at `path`.
    pub fn unix(
        handler: Arc<dyn RequestHandler>,
        context: Arc<EndpointContext>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self::new(handler, context, Transport::Unix { path: path.into() })
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_limits(mut self, limits: EndpointLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn context(&self) -> &Arc<EndpointContext> {
        &self.context
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Router serving the handler under the endpoint's base path.
    ///
    /// A base path of `/` catches every request; otherwise only the base path
    /// itself and paths below it are served and anything else is a 404.
    pub fn router(&self) -> Router {
        let state = DispatchState {
            handler: self.handler.clone(),
            endpoint_id: Arc::from(self.context.endpoint_id()),
            base_path: Arc::from(self.base_path.as_str()),
            max_body_bytes: self.limits.max_body_bytes,
        };

        let router = if self.base_path == "/" {
            Router::new().fallback(dispatch)
        } else {
            let base = self.base_path.trim_end_matches('/');
            Router::new()
                .route(base, any(dispatch))
                .route(&format!("{base}/"), any(dispatch))
                .route(&format!("{base}/{{*rest}}"), any(dispatch))
        };

        router
            .layer(tower::limit::ConcurrencyLimitLayer::new(
                self.limits.max_connections,
            ))
            .with_state(state)
    }

    /// Bind the endpoint's listener.
    ///
    /// For Unix sockets a stale socket file left by a previous run is removed
    /// first; any other kind of file at the path is an error.
    pub async fn bind(self) -> Result<BoundEndpoint> {
        check_base_path(&self.base_path).map_err(Error::BasePath)?;
        let router = self.router();
        let endpoint_id = self.context.endpoint_id().to_string();
        let target = self.transport.to_string();

        let listener = match &self.transport {
            Transport::Tcp { port, ip } => {
                let ip = ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
                let listener = TcpListener::bind(SocketAddr::new(ip, *port))
                    .await
                    .map_err(|source| Error::Bind {
                        target: target.clone(),
                        source,
                    })?;
                BoundListener::Tcp(listener)
            }
            #[cfg(unix)]
            Transport::Unix { path } => {
                remove_stale_socket(path).map_err(|source| Error::Bind {
                    target: target.clone(),
                    source,
                })?;
                let listener =
                    tokio::net::UnixListener::bind(path).map_err(|source| Error::Bind {
                        target: target.clone(),
                        source,
                    })?;
                BoundListener::Unix {
                    listener,
                    path: path.clone(),
                }
            }
            #[cfg(not(unix))]
            Transport::Unix { .. } => {
                return Err(Error::Bind {
                    target,
                    source: std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "unix sockets are not supported on this platform",
                    ),
                });
            }
        };

        let local = match &listener {
            BoundListener::Tcp(l) => format!("tcp:{}", l.local_addr()?),
            #[cfg(unix)]
            BoundListener::Unix { path, .. } => format!("unix:{}", path.display()),
        };
        debug!(endpoint_id = %endpoint_id, handler = self.handler.id(), address = %local, "endpoint bound");

        Ok(BoundEndpoint {
            endpoint_id,
            local,
            listener,
            router,
        })
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)
        }
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

enum BoundListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
}

/// An endpoint whose listener is bound and ready to accept connections.
pub struct BoundEndpoint {
    endpoint_id: String,
    local: String,
    listener: BoundListener,
    router: Router,
}

impl BoundEndpoint {
    /// Printable listener address (`tcp:127.0.0.1:8080`, `unix:/path`).
    ///
    /// For TCP this is the address actually bound, so port 0 is resolved.
    pub fn local_addr(&self) -> &str {
        &self.local
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.listener {
            BoundListener::Tcp(listener) => {
                axum::serve(listener, self.router)
                    .with_graceful_shutdown(shutdown)
                    .await?;
            }
            #[cfg(unix)]
            BoundListener::Unix { listener, path } => {
                let result = axum::serve(listener, self.router)
                    .with_graceful_shutdown(shutdown)
                    .await;
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove socket file");
                }
                result?;
            }
        }
        info!(endpoint_id = %self.endpoint_id, "endpoint stopped");
        Ok(())
    }
}

#[derive(Clone)]
struct DispatchState {
    handler: Arc<dyn RequestHandler>,
    endpoint_id: Arc<str>,
    base_path: Arc<str>,
    max_body_bytes: usize,
}

async fn dispatch(State(state): State<DispatchState>, request: Request<Body>) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    handle_request(&state, request, request_id).await
}

/// Run one request through the handler hooks and record its outcome.
#[instrument(skip_all, fields(request_id = %request_id, endpoint_id = %state.endpoint_id, method = %request.method(), path = %request.uri().path()))]
async fn handle_request(state: &DispatchState, request: Request<Body>, request_id: String) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let head = RequestHead::from_parts(&parts);

    let response = match run_handler(state, &head, body).await {
        Ok(reply) => reply.into_response(),
        Err(response) => response,
    };

    let status = response.status().as_u16();
    debug!(status, "request completed");
    metrics::record_request(
        &state.endpoint_id,
        status,
        head.method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn run_handler(
    state: &DispatchState,
    head: &RequestHead,
    body: Body,
) -> std::result::Result<Reply, Response> {
    let url_args = parse_url_args(head.uri.query());

    let declared_length = head
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > state.max_body_bytes) {
        warn!(
            max_body_bytes = state.max_body_bytes,
            "request body exceeds limit"
        );
        return Err(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("request body exceeds {} bytes", state.max_body_bytes),
        ));
    }

    // Within a declared length only transport failures remain; without one
    // the read fails when the streamed body runs past the limit
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| {
            warn!(error = %e, "failed to read request body");
            let status = if declared_length.is_some() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::PAYLOAD_TOO_LARGE
            };
            error_response(status, &format!("failed to read request body: {e}"))
        })?;

    let body_args = if head.method == Method::GET || head.method == Method::HEAD {
        Args::new()
    } else {
        state
            .handler
            .parse_request_body(head, body)
            .await
            .map_err(|e| handler_error(state, e))?
    };

    let blob = state
        .handler
        .calculate_response(head, &state.base_path, url_args, body_args)
        .map_err(|e| handler_error(state, e))?;

    Ok(state.handler.send_response(blob).await)
}

/// Query arguments; blank values are kept, malformed escapes pass through as-is.
fn parse_url_args(query: Option<&str>) -> Args {
    let mut args = Args::new();
    if let Some(query) = query {
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            args.entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }
    args
}

fn handler_error(state: &DispatchState, err: handler::HandlerError) -> Response {
    warn!(error = %err, kind = err.kind(), "request rejected by handler");
    metrics::record_parse_error(&state.endpoint_id, err.kind());
    error_response(err.status(), &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, [(CONTENT_TYPE, TEXT_PLAIN_UTF8)], message.to_string()).into_response()
}
