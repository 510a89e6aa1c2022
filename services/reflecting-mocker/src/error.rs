//! Service-specific error types

use thiserror::Error;

/// Listener lifecycle errors.
///
/// Per-request failures (body parse errors, oversized bodies) never propagate
/// as Rust errors: the endpoint answers them directly as HTTP responses.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to bind {target}: {source}")]
    Bind {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot mount endpoint: {0}")]
    BasePath(String),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_the_target() {
        let err = Error::Bind {
            target: "unix:/tmp/reflector.sock".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("unix:/tmp/reflector.sock"), "got: {msg}");
        assert!(msg.contains("denied"), "got: {msg}");
    }

    #[test]
    fn error_debug_includes_variant_name() {
        let err = Error::Serve(std::io::Error::other("accept failed"));
        let debug = format!("{err:?}");
        assert!(
            debug.contains("Serve"),
            "Debug output must include variant name, got: {debug}"
        );
    }
}
