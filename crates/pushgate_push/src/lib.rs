//! Provider delivery for Pushgate
//!
//! [`PushRouter`] implements the queue's `JobDispatcher`: it selects one of the five
//! adapters in [`providers`] by device type, resolves credentials and reduces every
//! provider's answer to an [`Outcome`]. Apple connections are reused through
//! [`ApnsPool`].

pub mod error;
pub mod outcome;
pub mod pool;
pub mod providers;
pub mod router;
pub mod token;

pub use error::PushError;
pub use outcome::{Delivery, Outcome, RecipientResult};
pub use pool::{ApnsConnection, ApnsConnector, ApnsPool, PoolEntryStats, PooledConnection};
pub use providers::PushProvider;
pub use router::{ProviderStats, PushRouter};
pub use token::{AccessTokenSource, ServiceAccountTokenSource, TokenCache};
