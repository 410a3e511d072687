//! Customized unified error type.

use std::fmt;
use std::io;
use std::net;

/// Customized error type for replikv.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ReplikvError(pub String);

impl ReplikvError {
    /// Constructs an error from anything convertible to a string.
    pub fn msg(msg: impl ToString) -> Self {
        ReplikvError(msg.to_string())
    }
}

impl fmt::Display for ReplikvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl std::error::Error for ReplikvError {}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `ReplikvError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ReplikvError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ReplikvError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::sync::watch::error::SendError<bool>);

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ReplikvError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ReplikvError(e.to_string())
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ReplikvError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = ReplikvError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }
}
