//! Error types shared by the transformer

/// Errors raised by the transformer.
///
/// `Transport` failures never reach a caller; the batch coordinator absorbs
/// them into the per-request failure count.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to load image from {location}: {reason}")]
    ImageLoad { location: String, reason: String },

    #[error("inference server at {endpoint} is unavailable: {reason}")]
    ServerUnavailable { endpoint: String, reason: String },

    #[error("inference call failed: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn unavailable(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Error::ServerUnavailable {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error means the predictor connection is gone
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::ServerUnavailable { .. })
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::InvalidInput(format!("undecodable image: {}", err))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::InvalidInput(format!("invalid base64 payload: {}", err))
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Transport(format!("{:?}: {}", status.code(), status.message()))
    }
}
