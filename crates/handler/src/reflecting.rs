//! Reflecting handler: answers every request with a description of itself.
//!
//! The response body is a JSON document with the method, full path, mount
//! prefix, headers, HTTP version, endpoint id and the parsed query and body
//! arguments, so a test can inspect exactly what the proxy under test sent.
//! The endpoint's fault flags can replace that with a forced 500 or 307.

use crate::context::EndpointContext;
use crate::{Args, Reply, RequestHandler, RequestHead, Result, TEXT_PLAIN_UTF8};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, StatusCode, Version};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Body sent when the `always_bork` flag is set.
pub const BORK_MESSAGE: &str = "Broken response due to `always_bork` flag being set";

const APPLICATION_JSON: &str = "application/json";

/// Everything the reflecting endpoint reports about one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    /// Request target as received, query string included.
    pub path: String,
    pub path_base: String,
    /// `[name, value]` pairs, lowercased names. Names keep the order they first
    /// appeared in and repeated names are listed together, values in arrival
    /// order.
    pub headers: Vec<(String, String)>,
    pub request_version: String,
    pub endpoint_id: String,
    pub args_url: Args,
    pub args_body: Args,
}

impl RequestSnapshot {
    pub fn capture(
        head: &RequestHead,
        base_path: &str,
        endpoint_id: &str,
        args_url: Args,
        args_body: Args,
    ) -> Self {
        let path = head
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| head.uri.path());

        Self {
            method: head.method.to_string(),
            path: path.to_owned(),
            path_base: base_path.to_owned(),
            headers: header_pairs(&head.headers),
            request_version: version_label(head.version).to_owned(),
            endpoint_id: endpoint_id.to_owned(),
            args_url,
            args_body,
        }
    }
}

/// Pairs in `HeaderMap` iteration order: every value of a name is yielded
/// before the next name. Values are decoded as ISO-8859-1 so any byte
/// sequence maps to a valid string.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = value.as_bytes().iter().map(|&b| char::from(b)).collect();
            (name.as_str().to_owned(), value)
        })
        .collect()
}

fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Request handler that sends the request back to the client as JSON.
pub struct ReflectingHandler {
    context: Arc<EndpointContext>,
}

impl ReflectingHandler {
    pub fn new(context: Arc<EndpointContext>) -> Self {
        Self { context }
    }
}

impl RequestHandler for ReflectingHandler {
    fn id(&self) -> &str {
        "reflecting"
    }

    fn parse_request_body<'a>(
        &'a self,
        head: &'a RequestHead,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<Args>> + Send + 'a>> {
        Box::pin(crate::body::parse_request_body(&head.headers, body))
    }

    fn calculate_response(
        &self,
        head: &RequestHead,
        base_path: &str,
        url_args: Args,
        body_args: Args,
    ) -> Result<Vec<u8>> {
        let snapshot = RequestSnapshot::capture(
            head,
            base_path,
            self.context.endpoint_id(),
            url_args,
            body_args,
        );
        Ok(serde_json::to_vec(&snapshot)?)
    }

    fn send_response(&self, blob: Vec<u8>) -> Pin<Box<dyn Future<Output = Reply> + Send + '_>> {
        Box::pin(async move {
            let flags = self.context.snapshot().await;
            let endpoint_id = self.context.endpoint_id();

            if flags.always_bork {
                debug!(endpoint_id, "sending broken response as requested");
                return Reply::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    TEXT_PLAIN_UTF8,
                    BORK_MESSAGE,
                );
            }

            if flags.always_redirect {
                debug!(
                    endpoint_id,
                    redirect_target = %flags.redirect_target,
                    "sending redirect as requested"
                );
                return Reply::new(StatusCode::TEMPORARY_REDIRECT, TEXT_PLAIN_UTF8, blob)
                    .with_header(LOCATION, flags.redirect_target);
            }

            // JSON is UTF-8 by definition, no charset parameter needed
            Reply::new(StatusCode::OK, APPLICATION_JSON, blob)
        })
    }
}
