//! Store interfaces for devices, hub subscriptions and project credentials
//!
//! Each store has an SQL implementation backed by [`crate::DbClient`] and an
//! in-memory one used in tests and when no database is configured.

use crate::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pushgate_common::{
    Device, DeviceFilter, DeviceType, HubSubscription, ProviderCredential, ProviderKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod memory;
pub mod sql;

pub use memory::{MemoryDeviceStore, MemoryHubStore, MemoryProjectCredentialStore};
pub use sql::{SqlDeviceStore, SqlHubStore, SqlProjectCredentialStore};

/// Persistence for [`Device`] records.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Upserts a device.
    ///
    /// An existing record with the same `(device_type, device_id, owner_id)` keeps its
    /// topics, gains the incoming ones, and has its metadata merged key by key with the
    /// incoming values winning. Returns the stored record.
    async fn save(&self, device: Device) -> Result<Device, DbError>;

    /// Removes one topic from a device. Returns `false` when the device does not exist.
    async fn remove_topic(
        &self,
        device_type: &DeviceType,
        device_id: &str,
        owner_id: &str,
        topic: &str,
    ) -> Result<bool, DbError>;

    /// Devices of an owner; with a topic, only those subscribed to it.
    async fn find_by_owner_and_topic(
        &self,
        owner_id: &str,
        topic: Option<&str>,
    ) -> Result<Vec<Device>, DbError>;

    /// Deletes every device matching the filter and returns how many were removed.
    async fn delete(&self, filter: &DeviceFilter) -> Result<u64, DbError>;
}

/// Persistence for the hubs each owner subscribed through.
#[async_trait]
pub trait HubStore: Send + Sync {
    /// Adds a hub URI to the owner's record, creating it when needed.
    async fn save(&self, owner_id: &str, hub_uri: &str) -> Result<HubSubscription, DbError>;

    async fn find_by_owner(&self, owner_id: &str) -> Result<Option<HubSubscription>, DbError>;
}

/// A stored per-app credential blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCredential {
    pub provider_type: ProviderKind,
    pub project_id: String,
    pub config: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Persistence for per-app provider credentials.
#[async_trait]
pub trait ProjectCredentialStore: Send + Sync {
    /// Shallow-merges `patch` into the stored blob (creating it when absent), bumps
    /// `last_updated_at`, and persists the result only if it validates for the provider.
    async fn save(
        &self,
        provider_type: ProviderKind,
        project_id: &str,
        patch: Map<String, Value>,
    ) -> Result<ProjectCredential, DbError>;

    async fn find(
        &self,
        provider_type: ProviderKind,
        project_id: &str,
    ) -> Result<Option<ProjectCredential>, DbError>;

    /// The validated credential for `(provider_type, project_id)`, if one is stored.
    async fn find_config(
        &self,
        provider_type: ProviderKind,
        project_id: &str,
    ) -> Result<Option<ProviderCredential>, DbError> {
        match self.find(provider_type, project_id).await? {
            Some(record) => Ok(Some(ProviderCredential::from_config(
                provider_type,
                &Value::Object(record.config),
            )?)),
            None => Ok(None),
        }
    }
}

/// Merge step shared by the store implementations.
pub(crate) fn merge_device(existing: Option<Device>, incoming: Device) -> Device {
    match existing {
        Some(mut stored) => {
            stored.topics.extend(incoming.topics);
            stored.merge_extra(&incoming.extra);
            stored
        }
        None => incoming,
    }
}

/// Merge-and-validate step shared by the credential store implementations.
pub(crate) fn merge_credential(
    existing: Option<ProjectCredential>,
    provider_type: ProviderKind,
    project_id: &str,
    patch: Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<ProjectCredential, DbError> {
    let mut record = existing.unwrap_or_else(|| ProjectCredential {
        provider_type,
        project_id: project_id.to_string(),
        config: Map::new(),
        created_at: now,
        last_updated_at: now,
    });
    for (key, value) in patch {
        record.config.insert(key, value);
    }
    record.last_updated_at = now;

    ProviderCredential::from_config(provider_type, &Value::Object(record.config.clone()))?;
    Ok(record)
}
