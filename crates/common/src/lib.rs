//! Common types shared by the mocker crates

mod error;

pub use error::{Error, Result};
