//! Request body argument parsing
//!
//! Recognizes `multipart/form-data` and `application/x-www-form-urlencoded`
//! bodies so a test client can check what the proxy under test forwarded.
//! Anything else (or no content type at all) yields no body arguments.
//!
//! Urlencoded bodies are decoded strictly: a stray `%`, a bad hex escape or
//! bytes that are not UTF-8 fail the parse instead of being dropped or
//! replaced.

use crate::{Args, HandlerError, Result};
use axum::http::HeaderMap;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use tracing::debug;

const MULTIPART_FORM_DATA: &str = "multipart/form-data";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Parse body arguments according to the request's `content-type`.
pub async fn parse_request_body(headers: &HeaderMap, body: Bytes) -> Result<Args> {
    let Some(raw) = headers.get(CONTENT_TYPE) else {
        return Ok(Args::new());
    };
    let Ok(content_type) = raw.to_str() else {
        debug!("content-type is not visible ASCII, ignoring body");
        return Ok(Args::new());
    };

    match media_type(content_type).as_str() {
        MULTIPART_FORM_DATA => parse_multipart(content_type, body).await,
        FORM_URLENCODED => {
            let expected = content_length(headers)?;
            if body.len() < expected {
                return Err(HandlerError::TruncatedBody {
                    expected,
                    actual: body.len(),
                });
            }
            let text =
                std::str::from_utf8(&body[..expected]).map_err(|_| HandlerError::InvalidUtf8)?;
            parse_urlencoded_strict(text)
        }
        other => {
            debug!(content_type = other, "unrecognized content type, no body arguments");
            Ok(Args::new())
        }
    }
}

/// Lowercased media type without parameters (`Text/HTML; charset=x` -> `text/html`).
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn content_length(headers: &HeaderMap) -> Result<usize> {
    let raw = headers
        .get(CONTENT_LENGTH)
        .ok_or(HandlerError::MissingContentLength)?;
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .ok_or_else(|| {
            HandlerError::InvalidContentLength(String::from_utf8_lossy(raw.as_bytes()).into_owned())
        })
}

async fn parse_multipart(content_type: &str, body: Bytes) -> Result<Args> {
    let boundary = multer::parse_boundary(content_type)?;
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut args = Args::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            debug!("skipping multipart field without a name");
            continue;
        };
        let value = field.text().await?;
        args.entry(name).or_default().push(value);
    }
    Ok(args)
}

/// Parse `a=1&b=&a=2` into `{a: [1, 2], b: [""]}`.
///
/// Blank values are kept, a pair without `=` counts as a blank value and empty
/// pairs (`a=1&&b=2`) are skipped.
pub fn parse_urlencoded_strict(input: &str) -> Result<Args> {
    let mut args = Args::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = decode_component(name)?;
        let value = decode_component(value)?;
        args.entry(name).or_default().push(value);
    }
    Ok(args)
}

fn decode_component(raw: &str) -> Result<String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some(&[hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => i += 3,
                _ => return Err(HandlerError::MalformedPercentEncoding(raw.to_owned())),
            }
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| HandlerError::InvalidUtf8)
}
