//! SQL implementations of the stores
//!
//! Sets and maps are stored as JSON text and timestamps as RFC 3339 strings, since
//! neither decodes through `sqlx::Any`.

use super::{
    merge_credential, merge_device, DeviceStore, HubStore, ProjectCredential,
    ProjectCredentialStore,
};
use crate::error::DbError;
use crate::DbClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pushgate_common::{Device, DeviceFilter, DeviceType, HubSubscription, ProviderKind};
use serde_json::{Map, Value};
use sqlx::any::AnyRow;
use sqlx::Row;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

fn query_error(context: &str) -> impl Fn(sqlx::Error) -> DbError + '_ {
    move |e| {
        error!("{}: {}", context, e);
        DbError::QueryError(e.to_string())
    }
}

fn column(row: &AnyRow, name: &str) -> Result<String, DbError> {
    row.try_get::<String, _>(name)
        .map_err(|e| DbError::CorruptRecord(format!("column {name}: {e}")))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &AnyRow, name: &str) -> Result<T, DbError> {
    serde_json::from_str(&column(row, name)?)
        .map_err(|e| DbError::CorruptRecord(format!("column {name}: {e}")))
}

fn time_column(row: &AnyRow, name: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(&column(row, name)?)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::CorruptRecord(format!("column {name}: {e}")))
}

fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|e| DbError::CorruptRecord(e.to_string()))
}

// --- Devices ---

#[derive(Debug, Clone)]
pub struct SqlDeviceStore {
    db_client: DbClient,
}

impl SqlDeviceStore {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    /// Creates the `devices` table if it does not exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        debug!("Initializing device schema");
        self.db_client
            .execute(
                r#"
            CREATE TABLE IF NOT EXISTS devices (
                device_type TEXT NOT NULL,
                device_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                topics TEXT NOT NULL,
                extra TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (device_type, device_id, owner_id)
            )
        "#,
            )
            .await?;
        info!("Device schema initialized successfully");
        Ok(())
    }

    fn device_from_row(row: &AnyRow) -> Result<Device, DbError> {
        Ok(Device {
            device_type: DeviceType::from(column(row, "device_type")?),
            device_id: column(row, "device_id")?,
            owner_id: column(row, "owner_id")?,
            topics: json_column::<BTreeSet<String>>(row, "topics")?,
            extra: json_column::<Map<String, Value>>(row, "extra")?,
        })
    }
}

#[async_trait]
impl DeviceStore for SqlDeviceStore {
    async fn save(&self, device: Device) -> Result<Device, DbError> {
        debug!(
            "Saving device {}:{} for owner {}",
            device.device_type, device.device_id, device.owner_id
        );
        let mut tx = self
            .db_client
            .pool()
            .begin()
            .await
            .map_err(query_error("Failed to begin transaction"))?;

        let existing = sqlx::query(
            r#"
            SELECT device_type, device_id, owner_id, topics, extra
            FROM devices
            WHERE device_type = $1 AND device_id = $2 AND owner_id = $3
        "#,
        )
        .bind(device.device_type.as_str())
        .bind(&device.device_id)
        .bind(&device.owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error("Failed to load device"))?
        .map(|row| Self::device_from_row(&row))
        .transpose()?;

        let merged = merge_device(existing, device);

        sqlx::query(
            r#"
            INSERT INTO devices (device_type, device_id, owner_id, topics, extra, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (device_type, device_id, owner_id)
            DO UPDATE SET topics = excluded.topics, extra = excluded.extra, updated_at = excluded.updated_at
        "#,
        )
        .bind(merged.device_type.as_str())
        .bind(&merged.device_id)
        .bind(&merged.owner_id)
        .bind(to_json_text(&merged.topics)?)
        .bind(to_json_text(&merged.extra)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(query_error("Failed to save device"))?;

        tx.commit()
            .await
            .map_err(query_error("Failed to commit device"))?;
        Ok(merged)
    }

    async fn remove_topic(
        &self,
        device_type: &DeviceType,
        device_id: &str,
        owner_id: &str,
        topic: &str,
    ) -> Result<bool, DbError> {
        let mut tx = self
            .db_client
            .pool()
            .begin()
            .await
            .map_err(query_error("Failed to begin transaction"))?;

        let row = sqlx::query(
            r#"
            SELECT topics FROM devices
            WHERE device_type = $1 AND device_id = $2 AND owner_id = $3
        "#,
        )
        .bind(device_type.as_str())
        .bind(device_id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error("Failed to load device topics"))?;

        let Some(row) = row else {
            return Ok(false);
        };
        let mut topics: BTreeSet<String> = json_column(&row, "topics")?;
        topics.remove(topic);

        sqlx::query(
            r#"
            UPDATE devices SET topics = $1, updated_at = $2
            WHERE device_type = $3 AND device_id = $4 AND owner_id = $5
        "#,
        )
        .bind(to_json_text(&topics)?)
        .bind(Utc::now().to_rfc3339())
        .bind(device_type.as_str())
        .bind(device_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await
        .map_err(query_error("Failed to update device topics"))?;

        tx.commit()
            .await
            .map_err(query_error("Failed to commit device topics"))?;
        Ok(true)
    }

    async fn find_by_owner_and_topic(
        &self,
        owner_id: &str,
        topic: Option<&str>,
    ) -> Result<Vec<Device>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT device_type, device_id, owner_id, topics, extra
            FROM devices
            WHERE owner_id = $1
            ORDER BY device_type, device_id
        "#,
        )
        .bind(owner_id)
        .fetch_all(self.db_client.pool())
        .await
        .map_err(query_error("Failed to find devices"))?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in &rows {
            let device = Self::device_from_row(row)?;
            if topic.map_or(true, |t| device.topics.contains(t)) {
                devices.push(device);
            }
        }
        Ok(devices)
    }

    async fn delete(&self, filter: &DeviceFilter) -> Result<u64, DbError> {
        let result = match &filter.owner_id {
            Some(owner_id) => {
                sqlx::query(
                    "DELETE FROM devices WHERE device_type = $1 AND device_id = $2 AND owner_id = $3",
                )
                .bind(filter.device_type.as_str())
                .bind(&filter.device_id)
                .bind(owner_id)
                .execute(self.db_client.pool())
                .await
            }
            None => {
                sqlx::query("DELETE FROM devices WHERE device_type = $1 AND device_id = $2")
                    .bind(filter.device_type.as_str())
                    .bind(&filter.device_id)
                    .execute(self.db_client.pool())
                    .await
            }
        }
        .map_err(query_error("Failed to delete devices"))?;

        Ok(result.rows_affected())
    }
}

// --- Hubs ---

#[derive(Debug, Clone)]
pub struct SqlHubStore {
    db_client: DbClient,
}

impl SqlHubStore {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    /// Creates the `hub_subscriptions` table if it does not exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        self.db_client
            .execute(
                r#"
            CREATE TABLE IF NOT EXISTS hub_subscriptions (
                owner_id TEXT NOT NULL,
                hub_uri TEXT NOT NULL,
                PRIMARY KEY (owner_id, hub_uri)
            )
        "#,
            )
            .await?;
        info!("Hub subscription schema initialized successfully");
        Ok(())
    }
}

#[async_trait]
impl HubStore for SqlHubStore {
    async fn save(&self, owner_id: &str, hub_uri: &str) -> Result<HubSubscription, DbError> {
        sqlx::query(
            r#"
            INSERT INTO hub_subscriptions (owner_id, hub_uri) VALUES ($1, $2)
            ON CONFLICT (owner_id, hub_uri) DO NOTHING
        "#,
        )
        .bind(owner_id)
        .bind(hub_uri)
        .execute(self.db_client.pool())
        .await
        .map_err(query_error("Failed to save hub subscription"))?;

        Ok(self.find_by_owner(owner_id).await?.unwrap_or_else(|| {
            HubSubscription {
                owner_id: owner_id.to_string(),
                hub_uris: BTreeSet::from([hub_uri.to_string()]),
            }
        }))
    }

    async fn find_by_owner(&self, owner_id: &str) -> Result<Option<HubSubscription>, DbError> {
        let rows = sqlx::query("SELECT hub_uri FROM hub_subscriptions WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_all(self.db_client.pool())
            .await
            .map_err(query_error("Failed to find hub subscriptions"))?;

        if rows.is_empty() {
            return Ok(None);
        }
        let hub_uris = rows
            .iter()
            .map(|row| column(row, "hub_uri"))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Some(HubSubscription {
            owner_id: owner_id.to_string(),
            hub_uris,
        }))
    }
}

// --- Project credentials ---

#[derive(Debug, Clone)]
pub struct SqlProjectCredentialStore {
    db_client: DbClient,
}

impl SqlProjectCredentialStore {
    pub fn new(db_client: DbClient) -> Self {
        Self { db_client }
    }

    /// Creates the `project_credentials` table if it does not exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        self.db_client
            .execute(
                r#"
            CREATE TABLE IF NOT EXISTS project_credentials (
                provider_type TEXT NOT NULL,
                project_id TEXT NOT NULL,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_updated_at TEXT NOT NULL,
                PRIMARY KEY (provider_type, project_id)
            )
        "#,
            )
            .await?;
        info!("Project credential schema initialized successfully");
        Ok(())
    }

    fn credential_from_row(
        provider_type: ProviderKind,
        row: &AnyRow,
    ) -> Result<ProjectCredential, DbError> {
        Ok(ProjectCredential {
            provider_type,
            project_id: column(row, "project_id")?,
            config: json_column(row, "config")?,
            created_at: time_column(row, "created_at")?,
            last_updated_at: time_column(row, "last_updated_at")?,
        })
    }
}

#[async_trait]
impl ProjectCredentialStore for SqlProjectCredentialStore {
    async fn save(
        &self,
        provider_type: ProviderKind,
        project_id: &str,
        patch: Map<String, Value>,
    ) -> Result<ProjectCredential, DbError> {
        let existing = self.find(provider_type, project_id).await?;
        let record = merge_credential(existing, provider_type, project_id, patch, Utc::now())?;

        sqlx::query(
            r#"
            INSERT INTO project_credentials (provider_type, project_id, config, created_at, last_updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider_type, project_id)
            DO UPDATE SET config = excluded.config, last_updated_at = excluded.last_updated_at
        "#,
        )
        .bind(provider_type.as_str())
        .bind(project_id)
        .bind(to_json_text(&record.config)?)
        .bind(record.created_at.to_rfc3339())
        .bind(record.last_updated_at.to_rfc3339())
        .execute(self.db_client.pool())
        .await
        .map_err(query_error("Failed to save project credential"))?;

        info!("Saved {} credential for project {}", provider_type, project_id);
        Ok(record)
    }

    async fn find(
        &self,
        provider_type: ProviderKind,
        project_id: &str,
    ) -> Result<Option<ProjectCredential>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT project_id, config, created_at, last_updated_at
            FROM project_credentials
            WHERE provider_type = $1 AND project_id = $2
        "#,
        )
        .bind(provider_type.as_str())
        .bind(project_id)
        .fetch_optional(self.db_client.pool())
        .await
        .map_err(query_error("Failed to find project credential"))?;

        row.map(|row| Self::credential_from_row(provider_type, &row))
            .transpose()
    }
}
