//! Provider adapters.
//!
//! Every adapter takes a validated credential, a batch of recipients and the payload,
//! and reports one [`Delivery`](crate::Delivery) per recipient.

use crate::error::PushError;
use crate::outcome::Outcome;
use async_trait::async_trait;
use pushgate_common::{ProviderCredential, ProviderKind, PushPayload};

pub mod apns;
pub mod fcm;
pub mod gcm;
pub mod hms;
pub mod wns;

pub use apns::{ApnsHttpConnector, ApnsProvider};
pub use fcm::FcmProvider;
pub use gcm::GcmProvider;
pub use hms::HmsProvider;
pub use wns::WnsProvider;

#[async_trait]
pub trait PushProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Delivers `payload` to every recipient.
    ///
    /// An `Err` means the whole call failed before any recipient could be judged.
    async fn send(
        &self,
        credential: &ProviderCredential,
        recipients: &[String],
        payload: &PushPayload,
    ) -> Result<Outcome, PushError>;
}
