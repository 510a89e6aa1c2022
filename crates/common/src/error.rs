//! Common error types

use thiserror::Error;

/// Error raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("duplicate endpoint id".into());
        assert_eq!(
            config_err.to_string(),
            "invalid configuration: duplicate endpoint id"
        );

        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(
            io_err.to_string().starts_with("cannot read config file:"),
            "got: {}",
            io_err
        );
    }

    #[test]
    fn toml_errors_convert_via_from() {
        let parse_err = toml::from_str::<toml::Table>("not valid {{{{ toml").unwrap_err();
        let err: Error = parse_err.into();
        let debug = format!("{:?}", err);
        assert!(
            debug.contains("Toml"),
            "Debug should include variant name, got: {debug}"
        );
    }
}
