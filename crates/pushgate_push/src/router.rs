//! Routes queued jobs to a provider adapter.
//!
//! For every attempt the router picks the adapter for the job's device type, resolves
//! the credential (per-project from the store, else the process-wide default), calls
//! the adapter, deletes devices the provider reported as gone, and turns the outcome
//! into a queue decision.

use crate::error::PushError;
use crate::outcome::{Delivery, Outcome};
use crate::pool::ApnsPool;
use crate::providers::{
    ApnsHttpConnector, ApnsProvider, FcmProvider, GcmProvider, HmsProvider, PushProvider,
    WnsProvider,
};
use crate::token::ServiceAccountTokenSource;
use async_trait::async_trait;
use pushgate_common::models::project_id;
use pushgate_common::{DeviceFilter, DeviceType, ProviderCredential, ProviderKind};
use pushgate_config::AppConfig;
use pushgate_db::{DbError, DeviceStore, ProjectCredentialStore};
use pushgate_queue::{Dispatch, JobDispatcher, PushJob};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delivery counters of one credential since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    pub sent: u64,
    pub failed: u64,
    pub invalid: u64,
    pub rate_limited: u64,
}

pub struct PushRouter {
    providers: HashMap<ProviderKind, Arc<dyn PushProvider>>,
    defaults: HashMap<ProviderKind, ProviderCredential>,
    use_fcm_v1: bool,
    devices: Arc<dyn DeviceStore>,
    credentials: Arc<dyn ProjectCredentialStore>,
    stats: Mutex<BTreeMap<String, ProviderStats>>,
}

impl PushRouter {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        credentials: Arc<dyn ProjectCredentialStore>,
        use_fcm_v1: bool,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            defaults: HashMap::new(),
            use_fcm_v1,
            devices,
            credentials,
            stats: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn PushProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn with_default_credential(mut self, credential: ProviderCredential) -> Self {
        self.defaults.insert(credential.kind(), credential);
        self
    }

    /// Builds a router with every HTTP adapter and the default credentials from config.
    pub fn from_config(
        config: &AppConfig,
        client: Client,
        devices: Arc<dyn DeviceStore>,
        credentials: Arc<dyn ProjectCredentialStore>,
    ) -> Result<Self, PushError> {
        let push = &config.push;
        let endpoints = &push.endpoints;

        let connector = ApnsHttpConnector::new(
            endpoints.apns_production.clone(),
            endpoints.apns_sandbox.clone(),
            Duration::from_secs(config.http.timeout_secs),
        );
        let pool = Arc::new(ApnsPool::new(
            Duration::from_secs(push.apns_pool_ttl_secs),
            Arc::new(connector),
        ));

        let mut router = Self::new(devices, credentials, push.use_fcm_v1)
            .with_provider(Arc::new(ApnsProvider::new(pool)))
            .with_provider(Arc::new(GcmProvider::new(
                client.clone(),
                endpoints.gcm.clone(),
            )))
            .with_provider(Arc::new(FcmProvider::new(
                client.clone(),
                endpoints.fcm.clone(),
                Arc::new(ServiceAccountTokenSource::new()),
            )))
            .with_provider(Arc::new(WnsProvider::new(
                client.clone(),
                endpoints.wns_token.clone(),
            )))
            .with_provider(Arc::new(HmsProvider::new(
                client,
                endpoints.hms_token.clone(),
                endpoints.hms_push.clone(),
            )));

        let defaults: [(ProviderKind, &Option<Value>); 5] = [
            (ProviderKind::Apns, &push.defaults.apns),
            (ProviderKind::Gcm, &push.defaults.gcm),
            (ProviderKind::Fcm, &push.defaults.fcm),
            (ProviderKind::Wns, &push.defaults.wns),
            (ProviderKind::Hms, &push.defaults.hms),
        ];
        for (kind, value) in defaults {
            if let Some(value) = value {
                let credential = ProviderCredential::from_config(kind, value)?;
                info!(credential = %credential.identity(), "loaded default credential");
                router = router.with_default_credential(credential);
            }
        }

        Ok(router)
    }

    /// The provider serving a device type, if any.
    pub fn provider_for(&self, device_type: &DeviceType) -> Option<ProviderKind> {
        match device_type {
            DeviceType::Ios => Some(ProviderKind::Apns),
            DeviceType::Android if self.use_fcm_v1 => Some(ProviderKind::Fcm),
            DeviceType::Android => Some(ProviderKind::Gcm),
            DeviceType::Windows => Some(ProviderKind::Wns),
            DeviceType::Huawei => Some(ProviderKind::Hms),
            DeviceType::Other(_) => None,
        }
    }

    /// Per-project credential when the job names a project, else the default.
    async fn resolve_credential(
        &self,
        kind: ProviderKind,
        job: &PushJob,
    ) -> Result<Option<ProviderCredential>, DbError> {
        if let Some(project_id) = project_id(&job.extra) {
            if let Some(credential) = self.credentials.find_config(kind, project_id).await? {
                return Ok(Some(credential));
            }
            debug!(provider = %kind, project_id, "no project credential, using default");
        }
        Ok(self.defaults.get(&kind).cloned())
    }

    fn record(&self, identity: &str, outcome: &Outcome) {
        let mut stats = match self.stats.lock() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = stats.entry(identity.to_string()).or_default();
        for result in &outcome.results {
            match &result.delivery {
                Delivery::Sent => entry.sent += 1,
                Delivery::Invalid { .. } => {
                    entry.failed += 1;
                    entry.invalid += 1;
                }
                Delivery::Retry {
                    rate_limited: true, ..
                } => {
                    entry.failed += 1;
                    entry.rate_limited += 1;
                }
                Delivery::Retry { .. } | Delivery::Rejected { .. } => entry.failed += 1,
            }
        }
    }

    /// Snapshot of the delivery counters, keyed by credential identity.
    pub fn stats(&self) -> BTreeMap<String, ProviderStats> {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn delete_invalid(&self, device_type: &DeviceType, outcome: &Outcome) {
        for device_id in outcome.invalid_recipients() {
            let filter = DeviceFilter {
                device_type: device_type.clone(),
                device_id: device_id.to_string(),
                owner_id: None,
            };
            match self.devices.delete(&filter).await {
                Ok(removed) => {
                    info!(device_type = %device_type, device_id, removed, "deleted invalid device")
                }
                Err(e) => {
                    warn!(device_type = %device_type, device_id, "failed to delete invalid device: {}", e)
                }
            }
        }
    }

    /// Runs one attempt of `job` and reports the raw outcome.
    pub async fn route(&self, job: &PushJob) -> Result<Outcome, Dispatch> {
        let Some(kind) = self.provider_for(&job.device_type) else {
            return Err(Dispatch::Failed {
                reason: format!("unsupported device type: {}", job.device_type),
            });
        };
        let Some(provider) = self.providers.get(&kind) else {
            return Err(Dispatch::Failed {
                reason: format!("no adapter registered for {kind}"),
            });
        };

        let credential = match self.resolve_credential(kind, job).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return Err(Dispatch::Failed {
                    reason: format!("missing credentials for {kind}"),
                })
            }
            Err(DbError::InvalidCredential(e)) => {
                return Err(Dispatch::Failed {
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                return Err(Dispatch::Retry {
                    recipients: job.device_ids.clone(),
                    reason: format!("credential lookup failed: {e}"),
                })
            }
        };

        let outcome = match provider
            .send(&credential, &job.device_ids, &job.payload)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => {
                warn!(job_id = %job.id, credential = %credential.identity(), "push attempt failed: {}", e);
                return Err(Dispatch::Retry {
                    recipients: job.device_ids.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                error!(job_id = %job.id, credential = %credential.identity(), "push attempt rejected: {}", e);
                return Err(Dispatch::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let identity = credential.identity();
        self.record(&identity, &outcome);
        self.delete_invalid(&job.device_type, &outcome).await;
        debug!(
            job_id = %job.id,
            provider = %kind,
            sent = outcome.sent(),
            failed = outcome.failed(),
            totals = ?self.stats().get(&identity),
            "push attempt finished"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl JobDispatcher for PushRouter {
    async fn dispatch(&self, job: &PushJob) -> Dispatch {
        match self.route(job).await {
            Ok(outcome) => outcome.into_dispatch(),
            Err(dispatch) => dispatch,
        }
    }
}
