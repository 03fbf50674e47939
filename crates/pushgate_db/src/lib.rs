//! Storage for Pushgate
//!
//! Devices, hub subscriptions and per-app provider credentials live behind the
//! [`DeviceStore`], [`HubStore`] and [`ProjectCredentialStore`] traits. The SQL
//! implementations use SQLx through the `Any` driver, so the backend is chosen by the
//! URL scheme; SQLite is compiled in by default.
//!
//! # Example
//!
//! ```rust,no_run
//! use pushgate_db::{DbClient, DeviceStore, SqlDeviceStore};
//! use pushgate_common::Device;
//!
//! async fn register() -> Result<(), pushgate_db::DbError> {
//!     let client = DbClient::from_url("sqlite:data/pushgate.db").await?;
//!     let devices = SqlDeviceStore::new(client);
//!     devices.init_schema().await?;
//!     devices.save(Device::new("ios", "token", "owner").with_topic("inbox")).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod stores;

pub use client::DbClient;
pub use error::DbError;
pub use stores::{
    DeviceStore, HubStore, MemoryDeviceStore, MemoryHubStore, MemoryProjectCredentialStore,
    ProjectCredential, ProjectCredentialStore, SqlDeviceStore, SqlHubStore,
    SqlProjectCredentialStore,
};

/// Creates every table used by the SQL stores.
pub async fn init_schema(client: &DbClient) -> Result<(), DbError> {
    SqlDeviceStore::new(client.clone()).init_schema().await?;
    SqlHubStore::new(client.clone()).init_schema().await?;
    SqlProjectCredentialStore::new(client.clone())
        .init_schema()
        .await?;
    Ok(())
}
