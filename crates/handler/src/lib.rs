//! Request handler abstraction for mock HTTP endpoints
//!
//! Defines the `RequestHandler` trait that decouples transport plumbing
//! (listener binding, request dispatch, response writing) from the logic that
//! decides what a mock endpoint answers. `ReflectingHandler` is the handler
//! that echoes every request back as a JSON document; other handler variants
//! implement the same trait and plug into the same endpoint layer.

pub mod body;
pub mod context;
pub mod error;
pub mod reflecting;

pub use context::{EndpointContext, FaultFlags, MissingRedirectTarget};
pub use error::{HandlerError, Result};
pub use reflecting::{BORK_MESSAGE, ReflectingHandler, RequestSnapshot};

use axum::http::header::{CONTENT_TYPE, HeaderName};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Request arguments: name mapped to every value it was given, in order.
pub type Args = BTreeMap<String, Vec<String>>;

/// Content type used for plain text replies and error bodies.
pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// The parts of an inbound request a handler may inspect.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn from_parts(parts: &axum::http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }
}

/// A finalized response: status, content type, body and any extra headers.
///
/// The endpoint layer turns this into the bytes written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub extra_headers: Vec<(HeaderName, String)>,
}

impl Reply {
    pub fn new(status: StatusCode, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.extra_headers.push((name, value.into()));
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        for (name, value) in self.extra_headers {
            match HeaderValue::from_str(&value) {
                Ok(v) => {
                    headers.insert(name, v);
                }
                Err(e) => {
                    tracing::error!(header = %name, error = %e, "dropping reply with invalid header value");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        [(CONTENT_TYPE, TEXT_PLAIN_UTF8)],
                        format!("invalid value for response header `{name}`"),
                    )
                        .into_response();
                }
            }
        }
        response
    }
}

/// Capability interface between the transport layer and response logic.
///
/// The endpoint layer calls the hooks in order for every request:
/// `parse_request_body` (skipped for GET and HEAD), `calculate_response`,
/// then `send_response`, and writes the returned `Reply` to the client.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn RequestHandler>`).
pub trait RequestHandler: Send + Sync {
    /// Identifier for logging (e.g. "reflecting")
    fn id(&self) -> &str;

    /// Extract body arguments from the request body.
    fn parse_request_body<'a>(
        &'a self,
        head: &'a RequestHead,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<Args>> + Send + 'a>>;

    /// Compute the response body for a request mounted under `base_path`.
    fn calculate_response(
        &self,
        head: &RequestHead,
        base_path: &str,
        url_args: Args,
        body_args: Args,
    ) -> Result<Vec<u8>>;

    /// Decide how `blob` is delivered to the client.
    fn send_response(&self, blob: Vec<u8>) -> Pin<Box<dyn Future<Output = Reply> + Send + '_>>;
}
