use pushgate_common::GatewayError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("a push job needs at least one recipient")]
    EmptyBatch,

    #[error("push queue for {0} is unavailable")]
    Unavailable(String),
}

impl From<QueueError> for GatewayError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::EmptyBatch => GatewayError::Validation(err.to_string()),
            QueueError::Unavailable(_) => GatewayError::Queue(err.to_string()),
        }
    }
}
