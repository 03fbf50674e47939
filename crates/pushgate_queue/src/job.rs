use async_trait::async_trait;
use pushgate_common::{DeviceType, PushPayload};
use serde_json::{Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

/// One delivery unit: a payload for a batch of devices of a single type.
#[derive(Debug, Clone, PartialEq)]
pub struct PushJob {
    pub id: Uuid,
    pub device_type: DeviceType,
    /// Recipients in enqueue order, without duplicates.
    pub device_ids: Vec<String>,
    pub payload: PushPayload,
    /// Job metadata; `project_id` selects per-app credentials.
    pub extra: Map<String, Value>,
}

impl PushJob {
    pub fn new(
        device_type: DeviceType,
        device_ids: impl IntoIterator<Item = String>,
        payload: PushPayload,
        extra: Map<String, Value>,
    ) -> Self {
        let mut seen = HashSet::new();
        let device_ids = device_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            device_type,
            device_ids,
            payload,
            extra,
        }
    }

    /// Keeps only the given recipients, preserving the original order.
    pub(crate) fn narrow_to(&mut self, recipients: &[String]) {
        if recipients.is_empty() {
            return;
        }
        let keep: HashSet<&String> = recipients.iter().collect();
        self.device_ids.retain(|id| keep.contains(id));
    }
}

/// What the queue should do with a job after one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Nothing left to send.
    Delivered,
    /// Try again later for `recipients` (all recipients when empty).
    Retry {
        recipients: Vec<String>,
        reason: String,
    },
    /// Terminal failure; no further attempts.
    Failed { reason: String },
}

/// Processes a single job attempt.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &PushJob) -> Dispatch;
}

/// Terminal state of a job, reported once through [`crate::EnqueuedJob::done`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Completed { attempts: u32 },
    Failed { attempts: u32, reason: String },
    /// The attempts budget ran out while recipients were still retryable.
    Exhausted { attempts: u32, reason: String },
    /// The TTL elapsed before the next attempt was due.
    Expired { attempts: u32 },
    /// The queue shut down while the job was waiting for a retry.
    Dropped { attempts: u32 },
}

impl JobState {
    pub fn attempts(&self) -> u32 {
        match self {
            JobState::Completed { attempts }
            | JobState::Failed { attempts, .. }
            | JobState::Exhausted { attempts, .. }
            | JobState::Expired { attempts }
            | JobState::Dropped { attempts } => *attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> PushPayload {
        PushPayload {
            owner_id: "owner".into(),
            topic: None,
            data: json!(null),
        }
    }

    #[test]
    fn duplicate_recipients_are_dropped_in_order() {
        let job = PushJob::new(
            DeviceType::Ios,
            ["b", "a", "b", "c"].map(String::from),
            payload(),
            Map::new(),
        );
        assert_eq!(job.device_ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn narrowing_keeps_order_and_ignores_empty_sets() {
        let mut job = PushJob::new(
            DeviceType::Android,
            ["a", "b", "c"].map(String::from),
            payload(),
            Map::new(),
        );
        job.narrow_to(&[]);
        assert_eq!(job.device_ids.len(), 3);

        job.narrow_to(&["c".to_string(), "a".to_string()]);
        assert_eq!(job.device_ids, vec!["a", "c"]);
    }
}
