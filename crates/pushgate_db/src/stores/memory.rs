//! In-memory stores

use super::{
    merge_credential, merge_device, DeviceStore, HubStore, ProjectCredential,
    ProjectCredentialStore,
};
use crate::error::DbError;
use async_trait::async_trait;
use chrono::Utc;
use pushgate_common::{Device, DeviceFilter, DeviceType, HubSubscription, ProviderKind};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

type DeviceKey = (DeviceType, String, String);

#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    devices: RwLock<HashMap<DeviceKey, Device>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored device, in no particular order.
    pub async fn all(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }
}

fn key_of(device: &Device) -> DeviceKey {
    (
        device.device_type.clone(),
        device.device_id.clone(),
        device.owner_id.clone(),
    )
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn save(&self, device: Device) -> Result<Device, DbError> {
        let key = key_of(&device);
        let mut devices = self.devices.write().await;
        let merged = merge_device(devices.remove(&key), device);
        devices.insert(key, merged.clone());
        Ok(merged)
    }

    async fn remove_topic(
        &self,
        device_type: &DeviceType,
        device_id: &str,
        owner_id: &str,
        topic: &str,
    ) -> Result<bool, DbError> {
        let key = (
            device_type.clone(),
            device_id.to_string(),
            owner_id.to_string(),
        );
        let mut devices = self.devices.write().await;
        match devices.get_mut(&key) {
            Some(device) => {
                device.topics.remove(topic);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_owner_and_topic(
        &self,
        owner_id: &str,
        topic: Option<&str>,
    ) -> Result<Vec<Device>, DbError> {
        let devices = self.devices.read().await;
        let mut found: Vec<Device> = devices
            .values()
            .filter(|d| d.owner_id == owner_id)
            .filter(|d| topic.map_or(true, |t| d.topics.contains(t)))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            (&a.device_type, &a.device_id).cmp(&(&b.device_type, &b.device_id))
        });
        Ok(found)
    }

    async fn delete(&self, filter: &DeviceFilter) -> Result<u64, DbError> {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|_, device| !filter.matches(device));
        Ok((before - devices.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryHubStore {
    hubs: RwLock<HashMap<String, HubSubscription>>,
}

impl MemoryHubStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HubStore for MemoryHubStore {
    async fn save(&self, owner_id: &str, hub_uri: &str) -> Result<HubSubscription, DbError> {
        let mut hubs = self.hubs.write().await;
        let record = hubs
            .entry(owner_id.to_string())
            .or_insert_with(|| HubSubscription {
                owner_id: owner_id.to_string(),
                ..Default::default()
            });
        record.hub_uris.insert(hub_uri.to_string());
        Ok(record.clone())
    }

    async fn find_by_owner(&self, owner_id: &str) -> Result<Option<HubSubscription>, DbError> {
        Ok(self.hubs.read().await.get(owner_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryProjectCredentialStore {
    credentials: RwLock<HashMap<(ProviderKind, String), ProjectCredential>>,
}

impl MemoryProjectCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectCredentialStore for MemoryProjectCredentialStore {
    async fn save(
        &self,
        provider_type: ProviderKind,
        project_id: &str,
        patch: Map<String, Value>,
    ) -> Result<ProjectCredential, DbError> {
        let key = (provider_type, project_id.to_string());
        let mut credentials = self.credentials.write().await;
        let record = merge_credential(
            credentials.get(&key).cloned(),
            provider_type,
            project_id,
            patch,
            Utc::now(),
        )?;
        credentials.insert(key, record.clone());
        Ok(record)
    }

    async fn find(
        &self,
        provider_type: ProviderKind,
        project_id: &str,
    ) -> Result<Option<ProjectCredential>, DbError> {
        Ok(self
            .credentials
            .read()
            .await
            .get(&(provider_type, project_id.to_string()))
            .cloned())
    }
}
