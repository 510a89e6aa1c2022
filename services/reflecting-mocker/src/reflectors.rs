//! Reflecting endpoints over TCP and Unix sockets

use crate::endpoint::{Endpoint, Transport};
use handler::{EndpointContext, ReflectingHandler};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Reflecting endpoint listening on TCP `port`, on `ip` or all interfaces.
pub fn reflecting_tcp_endpoint(
    context: Arc<EndpointContext>,
    port: u16,
    ip: Option<IpAddr>,
) -> Endpoint {
    let handler = Arc::new(ReflectingHandler::new(context.clone()));
    Endpoint::tcp(handler, context, port, ip)
}

/// Reflecting endpoint listening on the Unix socket at `path`.
pub fn reflecting_unix_endpoint(context: Arc<EndpointContext>, path: impl Into<PathBuf>) -> Endpoint {
    let handler = Arc::new(ReflectingHandler::new(context.clone()));
    Endpoint::unix(handler, context, path)
}

/// Reflecting endpoint for a configured transport.
pub fn reflecting_endpoint(context: Arc<EndpointContext>, transport: Transport) -> Endpoint {
    match transport {
        Transport::Tcp { port, ip } => reflecting_tcp_endpoint(context, port, ip),
        Transport::Unix { path } => reflecting_unix_endpoint(context, path),
    }
}
