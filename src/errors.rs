use thiserror::Error;

/// An enum representing every error the library can produce.
#[derive(Error, Debug)]
pub enum Error {
    /// The input bytes are not a valid document: bad magic, truncation,
    /// malformed offsets or a version this library does not accept.
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// A typed accessor was called on a value of a different variant.
    #[error("Type error: {0}")]
    TypeError(&'static str),
    /// The data uses a format feature this library declines to handle.
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
    /// An offset or size cannot be represented in its on-disk encoding.
    #[error("Not representable: {0}")]
    Arithmetic(&'static str),
    #[error(transparent)]
    ParseError(#[from] binread::Error),
    #[error(transparent)]
    YamlError(#[from] serde_yaml::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(what: &str) -> Self {
        Error::InvalidData(what.to_owned())
    }
}
