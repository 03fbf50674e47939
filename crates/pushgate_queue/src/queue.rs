use crate::error::QueueError;
use crate::job::{Dispatch, JobDispatcher, JobState, PushJob};
use crate::retry::JobSettings;
use pushgate_common::{DeviceType, PushPayload};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle returned by [`PushQueue::enqueue`].
#[derive(Debug)]
pub struct EnqueuedJob {
    pub id: Uuid,
    /// Resolves once with the job's terminal state.
    pub done: oneshot::Receiver<JobState>,
}

struct Envelope {
    job: PushJob,
    deadline: Instant,
    attempts_made: u32,
    done: oneshot::Sender<JobState>,
}

impl Envelope {
    fn finish(self, state: JobState) {
        // The caller may have dropped the receiver
        let _ = self.done.send(state);
    }
}

/// Queue for one device type.
///
/// Jobs are handed to the dispatcher by a background worker, at most
/// `settings.concurrency` at a time. Retries wait on a timer and then re-enter the
/// queue behind whatever arrived in the meantime.
pub struct PushQueue {
    device_type: DeviceType,
    settings: JobSettings,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl PushQueue {
    /// Creates the queue and spawns its worker on the current runtime.
    pub fn new(
        device_type: DeviceType,
        settings: JobSettings,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            device_type.clone(),
            receiver,
            sender.downgrade(),
            settings.clone(),
            dispatcher,
        ));
        Self {
            device_type,
            settings,
            sender,
        }
    }

    pub fn device_type(&self) -> &DeviceType {
        &self.device_type
    }

    /// Enqueues one job carrying every recipient in `device_ids`.
    pub fn enqueue(
        &self,
        device_ids: Vec<String>,
        payload: PushPayload,
        extra: Map<String, Value>,
    ) -> Result<EnqueuedJob, QueueError> {
        if device_ids.is_empty() {
            return Err(QueueError::EmptyBatch);
        }
        let job = PushJob::new(self.device_type.clone(), device_ids, payload, extra);
        let id = job.id;
        let (done_tx, done_rx) = oneshot::channel();
        let envelope = Envelope {
            deadline: Instant::now() + self.settings.ttl,
            job,
            attempts_made: 0,
            done: done_tx,
        };

        let recipients = envelope.job.device_ids.len();
        self.sender
            .send(envelope)
            .map_err(|_| QueueError::Unavailable(self.device_type.to_string()))?;

        info!(
            job_id = %id,
            device_type = %self.device_type,
            recipients,
            "push job enqueued"
        );
        Ok(EnqueuedJob { id, done: done_rx })
    }
}

async fn run_worker(
    device_type: DeviceType,
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
    requeue: mpsc::WeakUnboundedSender<Envelope>,
    settings: JobSettings,
    dispatcher: Arc<dyn JobDispatcher>,
) {
    let semaphore = Arc::new(Semaphore::new(settings.permits()));
    debug!(device_type = %device_type, "push queue worker started");

    while let Some(envelope) = receiver.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        tokio::spawn(process(
            envelope,
            permit,
            dispatcher.clone(),
            requeue.clone(),
            settings.clone(),
        ));
    }

    debug!(device_type = %device_type, "push queue worker stopped");
}

async fn process(
    mut envelope: Envelope,
    permit: OwnedSemaphorePermit,
    dispatcher: Arc<dyn JobDispatcher>,
    requeue: mpsc::WeakUnboundedSender<Envelope>,
    settings: JobSettings,
) {
    let job_id = envelope.job.id;

    if Instant::now() >= envelope.deadline {
        warn!(job_id = %job_id, attempts = envelope.attempts_made, "push job expired before its attempt");
        let attempts = envelope.attempts_made;
        envelope.finish(JobState::Expired { attempts });
        return;
    }

    envelope.attempts_made += 1;
    let attempts = envelope.attempts_made;
    let outcome = dispatcher.dispatch(&envelope.job).await;
    drop(permit);

    match outcome {
        Dispatch::Delivered => {
            info!(job_id = %job_id, attempts, "push job completed");
            envelope.finish(JobState::Completed { attempts });
        }
        Dispatch::Failed { reason } => {
            warn!(job_id = %job_id, attempts, %reason, "push job failed");
            envelope.finish(JobState::Failed { attempts, reason });
        }
        Dispatch::Retry { recipients, reason } => {
            if !settings.should_retry(attempts) {
                warn!(job_id = %job_id, attempts, %reason, "push job exhausted its attempts");
                envelope.finish(JobState::Exhausted { attempts, reason });
                return;
            }

            let delay = settings.delay_after(attempts);
            if Instant::now() + delay >= envelope.deadline {
                warn!(job_id = %job_id, attempts, %reason, "push job would outlive its ttl, dropping");
                envelope.finish(JobState::Expired { attempts });
                return;
            }

            envelope.job.narrow_to(&recipients);
            debug!(
                job_id = %job_id,
                attempts,
                %reason,
                delay_ms = delay.as_millis() as u64,
                recipients = envelope.job.device_ids.len(),
                "push job scheduled for retry"
            );
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match requeue.upgrade() {
                    Some(sender) => {
                        if let Err(mpsc::error::SendError(envelope)) = sender.send(envelope) {
                            envelope.finish(JobState::Dropped { attempts });
                        }
                    }
                    None => envelope.finish(JobState::Dropped { attempts }),
                }
            });
        }
    }
}

/// One [`PushQueue`] per device type, created on first use.
pub struct PushQueues {
    settings: JobSettings,
    dispatcher: Arc<dyn JobDispatcher>,
    queues: Mutex<HashMap<DeviceType, Arc<PushQueue>>>,
}

impl PushQueues {
    pub fn new(settings: JobSettings, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            settings,
            dispatcher,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self, device_type: &DeviceType) -> Result<Arc<PushQueue>, QueueError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| QueueError::Unavailable(device_type.to_string()))?;
        let queue = queues.entry(device_type.clone()).or_insert_with(|| {
            Arc::new(PushQueue::new(
                device_type.clone(),
                self.settings.clone(),
                self.dispatcher.clone(),
            ))
        });
        Ok(queue.clone())
    }

    /// Enqueues one job for `device_type` carrying every recipient in `device_ids`.
    pub fn enqueue(
        &self,
        device_type: &DeviceType,
        device_ids: Vec<String>,
        payload: PushPayload,
        extra: Map<String, Value>,
    ) -> Result<EnqueuedJob, QueueError> {
        if device_ids.is_empty() {
            return Err(QueueError::EmptyBatch);
        }
        self.queue(device_type)?.enqueue(device_ids, payload, extra)
    }
}
