use http::StatusCode;
use thiserror::Error;

pub type EdgeResult<T> = Result<T, EdgeError>;

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("invalid request path: {0}")]
    InvalidPath(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("extension not allowed: {0}")]
    DisallowedExtension(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("method {0} is not supported")]
    MethodNotAllowed(String),
}

impl EdgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EdgeError::InvalidPath(_) => StatusCode::FORBIDDEN,
            EdgeError::NotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::DisallowedExtension(_) => StatusCode::FORBIDDEN,
            EdgeError::Read { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EdgeError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Short body sent to the client. Internal details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            EdgeError::InvalidPath(_) => "Forbidden",
            EdgeError::NotFound(_) => "Resource not found",
            EdgeError::DisallowedExtension(_) => "File type not served",
            EdgeError::Read { .. } => "Internal server error",
            EdgeError::MethodNotAllowed(_) => "Method not allowed",
        }
    }
}
