// --- File: crates/services/pushgate_backend/src/service_factory.rs ---
//! Builds the gateway's long-lived services from configuration.
//!
//! Stores are SQL-backed when a `database` section is configured and in-memory
//! otherwise. The push router owns every provider adapter; the queues dispatch into
//! it, and the subscription service is the only producer of jobs.

use crate::app_state::AppState;
use pushgate_common::create_client;
use pushgate_config::AppConfig;
use pushgate_db::{
    init_schema, DbClient, DbError, DeviceStore, HubStore, MemoryDeviceStore, MemoryHubStore,
    MemoryProjectCredentialStore, ProjectCredentialStore, SqlDeviceStore, SqlHubStore,
    SqlProjectCredentialStore,
};
use pushgate_push::{PushError, PushRouter};
use pushgate_queue::{JobSettings, PushQueues};
use pushgate_subscription::{HubClient, SubscriptionService};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that stop the gateway from starting.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Push router error: {0}")]
    Push(#[from] PushError),
}

/// The three stores every service shares.
pub struct Stores {
    pub devices: Arc<dyn DeviceStore>,
    pub hubs: Arc<dyn HubStore>,
    pub credentials: Arc<dyn ProjectCredentialStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            devices: Arc::new(MemoryDeviceStore::new()),
            hubs: Arc::new(MemoryHubStore::new()),
            credentials: Arc::new(MemoryProjectCredentialStore::new()),
        }
    }

    /// Connects to the configured database and creates missing tables.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        if config.database.is_none() {
            info!("No database configured, keeping devices and hubs in memory");
            return Ok(Self::in_memory());
        }

        let client = DbClient::new(config).await?;
        init_schema(&client).await?;
        info!("SQL stores ready");
        Ok(Self {
            devices: Arc::new(SqlDeviceStore::new(client.clone())),
            hubs: Arc::new(SqlHubStore::new(client.clone())),
            credentials: Arc::new(SqlProjectCredentialStore::new(client)),
        })
    }
}

/// Wires router, queues and subscription service on top of `stores`.
pub fn build_state(config: Arc<AppConfig>, stores: Stores) -> Result<AppState, StartupError> {
    let client = create_client(config.http.timeout_secs, true)?;

    let router = Arc::new(PushRouter::from_config(
        &config,
        client.clone(),
        stores.devices.clone(),
        stores.credentials,
    )?);
    let queues = Arc::new(PushQueues::new(
        JobSettings::from(&config.queue),
        router.clone(),
    ));
    let service = Arc::new(SubscriptionService::new(
        stores.devices,
        stores.hubs,
        queues,
        HubClient::new(client, config.callback_uri.clone()),
    ));

    info!(
        callback_uri = %config.callback_uri,
        use_fcm_v1 = config.push.use_fcm_v1,
        attempts = config.queue.attempts,
        "services initialized"
    );
    Ok(AppState::new(config, router, service))
}
