//! In-memory push job queue
//!
//! Jobs carry a batch of recipients of one device type. Each device type has its own
//! [`PushQueue`]; a failed attempt that the [`JobDispatcher`] reports as retryable
//! is rescheduled with exponential backoff until the attempts budget or the TTL runs
//! out. Jobs do not survive a restart.

pub mod error;
pub mod job;
pub mod queue;
pub mod retry;

pub use error::QueueError;
pub use job::{Dispatch, JobDispatcher, JobState, PushJob};
pub use queue::{EnqueuedJob, PushQueue, PushQueues};
pub use retry::JobSettings;
