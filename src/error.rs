use std::io;
use thiserror::Error;

/// Faults raised while turning a raw request into a response.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Malformed cookie, query or body input.
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// Raised by a route handler, an interceptor or an error handler.
    #[error("Handler error: {0}")]
    Handler(String),
    #[error("Panic: {0}")]
    Panic(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Template error: {0}")]
    Template(String),
    /// The response builder holds something that cannot go on the wire.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ServerError {
    pub fn handler(msg: impl Into<String>) -> Self {
        ServerError::Handler(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::BadRequest(_) => 400,
            ServerError::Parse(_) => 422,
            ServerError::Io(_)
            | ServerError::Handler(_)
            | ServerError::Panic(_)
            | ServerError::Json(_)
            | ServerError::Template(_)
            | ServerError::InvalidResponse(_) => 500,
        }
    }

    /// Converts a payload caught by `catch_unwind` into a fault.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(msg) = payload.downcast_ref::<&str>() {
            msg.to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "Unknown panic".to_string()
        };
        ServerError::Panic(msg)
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
