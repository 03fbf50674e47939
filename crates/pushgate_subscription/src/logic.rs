//! Subscription controller.
//!
//! Owns every device and hub state transition driven by the webhook endpoints and is
//! the only caller of the push queue.

use crate::error::VerificationError;
use crate::hub::{topic_from_hub_uri, HubClient, HubMode, HubResponse};
use futures::future::join_all;
use pushgate_common::models::{project_id, PROJECT_ID_KEY};
use pushgate_common::{
    validation_error, Device, DeviceFilter, DeviceType, GatewayError, PushPayload,
};
use pushgate_db::{DeviceStore, HubStore};
use pushgate_queue::PushQueues;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubscribeRequest {
    pub hub_uri: Option<String>,
    /// Defaults to the `hub.topic` query parameter of `hub_uri`.
    pub hub_topic: Option<String>,
    pub owner_id: Option<String>,
    pub oauth_token: Option<String>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    /// Any other field is stored as device metadata, e.g. `project_id`.
    #[serde(flatten)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UnsubscribeRequest {
    pub hub_uri: Option<String>,
    pub hub_topic: Option<String>,
    pub owner_id: Option<String>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UnregisterRequest {
    pub owner_id: Option<String>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
}

/// Query of a hub verification request.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct VerificationQuery {
    pub owner_id: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
}

/// One notification of a hub ping.
#[derive(Debug, Clone, Deserialize)]
pub struct Ping {
    pub owner_id: String,
    pub topic: String,
    pub object_data: Value,
}

impl Ping {
    /// Reads one entry of a ping batch; every field must be present and non-empty.
    pub fn parse(entry: Value) -> Result<Self, String> {
        let ping: Ping = serde_json::from_value(entry).map_err(|e| e.to_string())?;
        if ping.owner_id.trim().is_empty() {
            return Err("owner_id is empty".to_string());
        }
        if ping.topic.trim().is_empty() {
            return Err("topic is empty".to_string());
        }
        Ok(ping)
    }
}

/// Summary of a processed ping batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PingReport {
    /// Entries that were well-formed.
    pub accepted: usize,
    /// Entries skipped as malformed.
    pub skipped: usize,
    /// Jobs handed to the push queue.
    pub jobs: usize,
    /// Entries without subscribers, each starting an auto-unsubscribe.
    pub unsubscribed: usize,
    /// Well-formed entries that could not be fanned out (store or queue failure).
    pub failed: usize,
}

impl PingReport {
    /// Every entry was well-formed and handed on.
    pub fn fully_accepted(&self) -> bool {
        self.skipped == 0 && self.failed == 0
    }
}

/// Result of one hub request in an auto-unsubscribe cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubUnsubscribe {
    pub hub_uri: String,
    pub result: Result<u16, String>,
}

fn required(value: Option<String>, field: &str) -> Result<String, GatewayError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| validation_error(format!("{field} is required")))
}

fn topic_for(hub_topic: Option<String>, hub_uri: &str) -> Result<String, GatewayError> {
    hub_topic
        .filter(|t| !t.trim().is_empty())
        .or_else(|| topic_from_hub_uri(hub_uri))
        .ok_or_else(|| validation_error("hub_topic is required"))
}

#[derive(Clone)]
pub struct SubscriptionService {
    devices: Arc<dyn DeviceStore>,
    hubs: Arc<dyn HubStore>,
    queues: Arc<PushQueues>,
    hub: HubClient,
}

impl SubscriptionService {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        hubs: Arc<dyn HubStore>,
        queues: Arc<PushQueues>,
        hub: HubClient,
    ) -> Self {
        Self {
            devices,
            hubs,
            queues,
            hub,
        }
    }

    pub fn callback_uri(&self) -> &str {
        self.hub.callback_uri()
    }

    /// Records the device and hub, then asks the hub to subscribe.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<HubResponse, GatewayError> {
        let hub_uri = required(request.hub_uri, "hub_uri")?;
        let owner_id = required(request.owner_id, "owner_id")?;
        let oauth_token = required(request.oauth_token, "oauth_token")?;
        let device_type = required(request.device_type, "device_type")?;
        let device_id = required(request.device_id, "device_id")?;
        let topic = topic_for(request.hub_topic, &hub_uri)?;

        let mut device = Device::new(device_type, device_id, owner_id.as_str()).with_topic(&topic);
        device.merge_extra(&request.extra);
        let device = self.devices.save(device).await?;
        self.hubs.save(&owner_id, &hub_uri).await?;
        info!(
            owner_id,
            device_type = %device.device_type,
            device_id = %device.device_id,
            topic,
            topics = device.topics.len(),
            "device subscribed"
        );

        Ok(self
            .hub
            .subscribe(&hub_uri, &topic, &owner_id, &oauth_token)
            .await?)
    }

    /// Removes the topic from the device, then asks the hub to unsubscribe.
    pub async fn unsubscribe(
        &self,
        request: UnsubscribeRequest,
    ) -> Result<HubResponse, GatewayError> {
        let hub_uri = required(request.hub_uri, "hub_uri")?;
        let owner_id = required(request.owner_id, "owner_id")?;
        let device_type = DeviceType::from(required(request.device_type, "device_type")?);
        let device_id = required(request.device_id, "device_id")?;
        let topic = topic_for(request.hub_topic, &hub_uri)?;

        let removed = self
            .devices
            .remove_topic(&device_type, &device_id, &owner_id, &topic)
            .await?;
        if !removed {
            debug!(owner_id, device_type = %device_type, device_id, "unsubscribe for unknown device");
        }

        Ok(self.hub.unsubscribe(&hub_uri, &topic, &owner_id).await?)
    }

    /// Deletes every record of the device for the owner, whatever its topics.
    pub async fn unregister(&self, request: UnregisterRequest) -> Result<u64, GatewayError> {
        let owner_id = required(request.owner_id, "owner_id")?;
        let device_type = DeviceType::from(required(request.device_type, "device_type")?);
        let device_id = required(request.device_id, "device_id")?;

        let removed = self
            .devices
            .delete(&DeviceFilter {
                device_type,
                device_id,
                owner_id: Some(owner_id),
            })
            .await?;
        info!(removed, "device unregistered");
        Ok(removed)
    }

    /// Answers a hub verification request with the challenge to echo.
    pub async fn verify(&self, query: VerificationQuery) -> Result<String, VerificationError> {
        let owner_id = query
            .owner_id
            .filter(|v| !v.is_empty())
            .ok_or(VerificationError::MissingOwner)?;
        let challenge = query
            .challenge
            .filter(|v| !v.is_empty())
            .ok_or(VerificationError::MissingChallenge)?;
        let mode = query
            .mode
            .as_deref()
            .and_then(HubMode::parse)
            .ok_or(VerificationError::MissingMode)?;

        if mode == HubMode::Subscribe {
            let devices = self
                .devices
                .find_by_owner_and_topic(&owner_id, query.topic.as_deref())
                .await
                .map_err(|e| VerificationError::Persistence(e.to_string()))?;
            if devices.is_empty() {
                warn!(owner_id, topic = ?query.topic, "refusing subscription without devices");
                return Err(VerificationError::NoSubscribers);
            }
        }

        debug!(owner_id, mode = mode.as_str(), "hub verification accepted");
        Ok(challenge)
    }

    /// Fans a hub ping out to the push queue.
    ///
    /// Malformed entries are skipped. Entries without subscribed devices start an
    /// auto-unsubscribe in the background. A store or queue failure only fails its own
    /// entry; the rest of the batch is still processed.
    pub async fn deliver(&self, body: Value) -> Result<PingReport, GatewayError> {
        let Value::Array(entries) = body else {
            return Err(validation_error("callback body must be a JSON array"));
        };

        let mut report = PingReport::default();
        for entry in entries {
            let ping = match Ping::parse(entry) {
                Ok(ping) => ping,
                Err(e) => {
                    warn!("skipping malformed ping entry: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };
            report.accepted += 1;

            let devices = match self
                .devices
                .find_by_owner_and_topic(&ping.owner_id, Some(&ping.topic))
                .await
            {
                Ok(devices) => devices,
                Err(e) => {
                    error!(owner_id = %ping.owner_id, topic = %ping.topic, "device lookup failed: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            if devices.is_empty() {
                info!(owner_id = %ping.owner_id, topic = %ping.topic, "no subscribers left, unsubscribing");
                report.unsubscribed += 1;
                let service = self.clone();
                tokio::spawn(async move {
                    service.auto_unsubscribe(&ping.owner_id, &ping.topic).await;
                });
                continue;
            }

            let (queued, failed) = self.enqueue(&ping, devices);
            report.jobs += queued;
            if failed > 0 {
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// One job per device type and project. Returns how many jobs were queued and how
    /// many the queue refused.
    fn enqueue(&self, ping: &Ping, devices: Vec<Device>) -> (usize, usize) {
        let mut batches: BTreeMap<(DeviceType, Option<String>), Vec<String>> = BTreeMap::new();
        for device in devices {
            let project = project_id(&device.extra).map(str::to_string);
            batches
                .entry((device.device_type, project))
                .or_default()
                .push(device.device_id);
        }

        let payload = PushPayload {
            owner_id: ping.owner_id.clone(),
            topic: Some(ping.topic.clone()),
            data: ping.object_data.clone(),
        };

        let (mut queued, mut failed) = (0, 0);
        for ((device_type, project), device_ids) in batches {
            let mut extra = Map::new();
            if let Some(project) = project {
                extra.insert(PROJECT_ID_KEY.to_string(), Value::String(project));
            }
            let recipients = device_ids.len();
            match self
                .queues
                .enqueue(&device_type, device_ids, payload.clone(), extra)
            {
                Ok(job) => {
                    queued += 1;
                    debug!(job_id = %job.id, device_type = %device_type, recipients, topic = %ping.topic, "ping batch queued");
                }
                Err(e) => {
                    failed += 1;
                    error!(device_type = %device_type, recipients, topic = %ping.topic, "failed to queue ping batch: {}", e);
                }
            }
        }
        (queued, failed)
    }

    /// Asks every hub on file for the owner to stop sending `topic`.
    ///
    /// Each hub is contacted independently; one failing hub does not stop the others.
    pub async fn auto_unsubscribe(&self, owner_id: &str, topic: &str) -> Vec<HubUnsubscribe> {
        let hub_uris = match self.hubs.find_by_owner(owner_id).await {
            Ok(Some(record)) => record.hub_uris,
            Ok(None) => {
                debug!(owner_id, "no hubs on file");
                return Vec::new();
            }
            Err(e) => {
                error!(owner_id, "failed to load hubs for auto-unsubscribe: {}", e);
                return Vec::new();
            }
        };

        let requests = hub_uris.iter().map(|hub_uri| async move {
            let result = match self.hub.unsubscribe(hub_uri, topic, owner_id).await {
                Ok(response) => Ok(response.status),
                Err(e) => {
                    warn!(hub_uri, owner_id, topic, "auto-unsubscribe failed: {}", e);
                    Err(e.to_string())
                }
            };
            HubUnsubscribe {
                hub_uri: hub_uri.clone(),
                result,
            }
        });
        join_all(requests).await
    }
}
