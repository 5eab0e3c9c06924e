use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Tephra errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Invalid data, typically decoding errors, checksum mismatches, or
    /// broken internal invariants. Unrecoverable: callers should discard the
    /// affected sequence.
    InvalidData(String),
    /// Invalid user input, typically bad arguments or malformed rows.
    InvalidInput(String),
    /// An IO or blob store error.
    IO(String),
    /// An input row is missing the table's designated order key.
    MissingOrderKey(String),
    /// Rehydrated metadata disagrees with the configured order value type.
    OrderTypeMismatch { expected: String, found: String },
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::MissingOrderKey(key) => write!(f, "row is missing order key {key}"),
            Error::OrderTypeMismatch { expected, found } => {
                write!(
                    f,
                    "order column type mismatch: expected {expected}, found {found}"
                )
            }
        }
    }
}

/// Constructs an Error::InvalidData for the given format string.
#[macro_export]
macro_rules! errdata {
    ($($args:tt)*) => { $crate::error::Error::InvalidData(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidInput for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)).into() };
}

/// A Tephra Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
