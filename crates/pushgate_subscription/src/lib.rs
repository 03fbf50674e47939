// --- File: crates/pushgate_subscription/src/lib.rs ---
pub mod doc;
pub mod error;
pub mod handlers;
#[cfg(test)]
mod handlers_test;
pub mod hub;
pub mod logic;
pub mod routes;

pub use error::{HubError, VerificationError};
pub use hub::{HubClient, HubMode, HubResponse};
pub use logic::{HubUnsubscribe, PingReport, SubscriptionService};
pub use routes::routes;
