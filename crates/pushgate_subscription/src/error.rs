use pushgate_common::{GatewayError, HttpStatusCode};
use thiserror::Error;

/// Failures talking to an upstream hub.
#[derive(Error, Debug)]
pub enum HubError {
    /// The hub could not be reached or did not answer in time
    #[error("Hub request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    /// The hub URI is not an absolute http(s) URL
    #[error("Invalid hub URI: {0}")]
    InvalidUri(String),
}

impl From<HubError> for GatewayError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::RequestError(e) => GatewayError::UpstreamUnreachable(e.to_string()),
            HubError::InvalidUri(uri) => GatewayError::Validation(format!("invalid hub_uri: {uri}")),
        }
    }
}

impl HttpStatusCode for HubError {
    fn status_code(&self) -> u16 {
        match self {
            HubError::RequestError(_) => 503,
            HubError::InvalidUri(_) => 400,
        }
    }
}

/// Why a hub verification request was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("owner_id is required")]
    MissingOwner,

    #[error("hub.challenge is required")]
    MissingChallenge,

    #[error("hub.mode is required")]
    MissingMode,

    #[error("no device is subscribed to this topic")]
    NoSubscribers,

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl HttpStatusCode for VerificationError {
    fn status_code(&self) -> u16 {
        match self {
            VerificationError::MissingOwner => 401,
            VerificationError::MissingChallenge => 403,
            VerificationError::MissingMode => 404,
            VerificationError::NoSubscribers => 405,
            VerificationError::Persistence(_) => 500,
        }
    }
}
