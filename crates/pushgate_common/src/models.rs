//! Data shared by the subscription controller, the stores, the queue and the providers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Metadata key that selects per-app credentials for a device.
pub const PROJECT_ID_KEY: &str = "project_id";

/// Client platform of a device. Serialized as its lowercase name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    Ios,
    Android,
    Windows,
    Huawei,
    /// Any other value is stored as-is; the router refuses to deliver to it.
    Other(String),
}

impl DeviceType {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::Ios => "ios",
            DeviceType::Android => "android",
            DeviceType::Windows => "windows",
            DeviceType::Huawei => "huawei",
            DeviceType::Other(s) => s,
        }
    }
}

impl From<String> for DeviceType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ios" => DeviceType::Ios,
            "android" => DeviceType::Android,
            "windows" => DeviceType::Windows,
            "huawei" => DeviceType::Huawei,
            _ => DeviceType::Other(value),
        }
    }
}

impl From<&str> for DeviceType {
    fn from(value: &str) -> Self {
        DeviceType::from(value.to_string())
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered client device.
///
/// A device is identified by `(device_type, device_id, owner_id)`. The same
/// physical device registered for two owners is two records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_type: DeviceType,
    pub device_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    /// Free-form metadata supplied at subscribe time, e.g. `project_id`.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Device {
    pub fn new(
        device_type: impl Into<DeviceType>,
        device_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            device_type: device_type.into(),
            device_id: device_id.into(),
            owner_id: owner_id.into(),
            topics: BTreeSet::new(),
            extra: Map::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Merges metadata per key, the incoming value winning.
    pub fn merge_extra(&mut self, extra: &Map<String, Value>) {
        for (key, value) in extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// The `project_id` metadata, when it is a non-empty string.
    pub fn project_id(&self) -> Option<&str> {
        project_id(&self.extra)
    }
}

/// Reads the `project_id` entry of a metadata map.
pub fn project_id(extra: &Map<String, Value>) -> Option<&str> {
    extra
        .get(PROJECT_ID_KEY)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Filter for bulk device deletion. `owner_id: None` matches every owner.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFilter {
    pub device_type: DeviceType,
    pub device_id: String,
    pub owner_id: Option<String>,
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        device.device_type == self.device_type
            && device.device_id == self.device_id
            && self
                .owner_id
                .as_deref()
                .map_or(true, |owner| owner == device.owner_id)
    }
}

/// Hubs an owner has subscribed through. Never pruned.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HubSubscription {
    pub owner_id: String,
    pub hub_uris: BTreeSet<String>,
}

/// Notification content delivered to every device of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub owner_id: String,
    #[serde(default)]
    pub topic: Option<String>,
    /// The `object_data` of the hub ping, passed through untouched.
    #[serde(default)]
    pub data: Value,
}

impl PushPayload {
    /// Flat string map for transports that only accept string data values.
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("owner_id".to_string(), self.owner_id.clone());
        if let Some(topic) = &self.topic {
            map.insert("topic".to_string(), topic.clone());
        }
        if !self.data.is_null() {
            map.insert("object_data".to_string(), self.data.to_string());
        }
        map
    }

    /// Structured body for transports that accept arbitrary JSON.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("owner_id".to_string(), Value::String(self.owner_id.clone()));
        if let Some(topic) = &self.topic {
            map.insert("topic".to_string(), Value::String(topic.clone()));
        }
        map.insert("object_data".to_string(), self.data.clone());
        Value::Object(map)
    }
}
