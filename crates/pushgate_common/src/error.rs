use std::fmt;
use thiserror::Error;

/// Errors surfaced synchronously to webhook callers.
///
/// Delivery errors never reach this type: they stay inside the push queue and are
/// only visible through logs and job completion reports.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A required request field is missing or malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// The hub could not be reached at all
    #[error("Hub unreachable: {0}")]
    UpstreamUnreachable(String),

    /// A device, hub or credential store operation failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The push queue refused a job
    #[error("Queue error: {0}")]
    Queue(String),
}

/// A trait for converting errors to HTTP status codes.
pub trait HttpStatusCode {
    /// Returns the HTTP status code for this error.
    fn status_code(&self) -> u16;
}

impl HttpStatusCode for GatewayError {
    fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::UpstreamUnreachable(_) => 503,
            GatewayError::Persistence(_) => 500,
            GatewayError::Queue(_) => 503,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Validation(err.to_string())
    }
}

// Utility functions for error handling
pub fn validation_error<T: fmt::Display>(message: T) -> GatewayError {
    GatewayError::Validation(message.to_string())
}

pub fn persistence_error<T: fmt::Display>(message: T) -> GatewayError {
    GatewayError::Persistence(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_status_codes() {
        assert_eq!(validation_error("owner_id").status_code(), 400);
        assert_eq!(persistence_error("disk").status_code(), 500);
        assert_eq!(
            GatewayError::UpstreamUnreachable("refused".into()).status_code(),
            503
        );
    }
}
