use pushgate_common::{CredentialError, ProviderKind};
use thiserror::Error;

/// Errors that abort a whole adapter call.
///
/// Per-recipient failures are reported through [`crate::Outcome`] instead.
#[derive(Error, Debug)]
pub enum PushError {
    /// Error during the HTTP exchange with a provider or token endpoint
    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    /// An OAuth2 token could not be obtained
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// The credential cannot be used (bad key material, wrong provider)
    #[error("Credential error: {0}")]
    CredentialError(String),

    /// The provider answered with something that could not be interpreted
    #[error("{provider} API error: {message}")]
    ApiError {
        provider: ProviderKind,
        message: String,
    },
}

impl PushError {
    pub fn credential_mismatch(expected: ProviderKind, got: ProviderKind) -> Self {
        PushError::CredentialError(format!("expected a {expected} credential, got {got}"))
    }

    /// Whether trying the same call again later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::RequestError(_) | PushError::AuthError(_) | PushError::ApiError { .. } => {
                true
            }
            PushError::CredentialError(_) => false,
        }
    }
}

impl From<CredentialError> for PushError {
    fn from(err: CredentialError) -> Self {
        PushError::CredentialError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for PushError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        PushError::CredentialError(format!("provider token signing failed: {err}"))
    }
}
