//! Apple Push Notification service over HTTP/2.

use super::PushProvider;
use crate::error::PushError;
use crate::outcome::{Delivery, Outcome};
use crate::pool::{ApnsConnection, ApnsConnector, ApnsPool};
use async_trait::async_trait;
use futures::future::join_all;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use pushgate_common::credentials::{ApnsAuth, ApnsCredential};
use pushgate_common::{ProviderCredential, ProviderKind, PushPayload};
use reqwest::{header, Client, Identity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Provider tokens are accepted for an hour; they are re-signed a little earlier.
const PROVIDER_TOKEN_LIFETIME: Duration = Duration::from_secs(50 * 60);

/// Maps an APNs response status to a delivery result.
pub fn classify(status: u16, reason: Option<&str>) -> Delivery {
    let reason = reason.unwrap_or("unknown").to_string();
    match status {
        200..=299 => Delivery::Sent,
        410 => Delivery::invalid(reason),
        429 => Delivery::rate_limited(reason),
        400..=499 => Delivery::rejected(reason),
        _ => Delivery::retry(reason),
    }
}

pub struct ApnsProvider {
    pool: Arc<ApnsPool>,
}

impl ApnsProvider {
    pub fn new(pool: Arc<ApnsPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ApnsPool> {
        &self.pool
    }
}

#[async_trait]
impl PushProvider for ApnsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Apns
    }

    async fn send(
        &self,
        credential: &ProviderCredential,
        recipients: &[String],
        payload: &PushPayload,
    ) -> Result<Outcome, PushError> {
        let ProviderCredential::Apns(apns) = credential else {
            return Err(PushError::credential_mismatch(
                ProviderKind::Apns,
                credential.kind(),
            ));
        };

        let pooled = self.pool.acquire(apns).await?;
        let deliveries = join_all(
            recipients
                .iter()
                .map(|token| pooled.connection.send(token, payload)),
        )
        .await;

        let mut outcome = Outcome::new();
        for (token, delivery) in recipients.iter().zip(deliveries) {
            outcome.push(token.clone(), delivery);
        }
        self.pool
            .record(
                &pooled.fingerprint,
                outcome.sent() as u64,
                outcome.failed() as u64,
            )
            .await;
        Ok(outcome)
    }
}

/// Opens HTTP/2 connections authenticated by client certificate or provider token.
pub struct ApnsHttpConnector {
    production_url: String,
    sandbox_url: String,
    timeout: Duration,
}

impl ApnsHttpConnector {
    pub fn new(production_url: String, sandbox_url: String, timeout: Duration) -> Self {
        Self {
            production_url,
            sandbox_url,
            timeout,
        }
    }
}

#[async_trait]
impl ApnsConnector for ApnsHttpConnector {
    async fn connect(
        &self,
        credential: &ApnsCredential,
    ) -> Result<Arc<dyn ApnsConnection>, PushError> {
        let builder = Client::builder().timeout(self.timeout);

        let (client, signer) = match &credential.auth {
            ApnsAuth::Certificate { cert, key } => {
                let identity = Identity::from_pem(format!("{cert}\n{key}\n").as_bytes())
                    .map_err(|e| PushError::CredentialError(format!("apns certificate: {e}")))?;
                let client = builder
                    .identity(identity)
                    .build()
                    .map_err(|e| PushError::CredentialError(format!("apns certificate: {e}")))?;
                (client, None)
            }
            ApnsAuth::Token {
                signing_key,
                key_id,
                team_id,
            } => {
                let signer = ProviderTokenSigner::new(signing_key, key_id, team_id)?;
                (builder.build()?, Some(signer))
            }
        };

        let base_url = if credential.production {
            self.production_url.clone()
        } else {
            self.sandbox_url.clone()
        };

        Ok(Arc::new(ApnsHttpConnection {
            client,
            base_url,
            bundle_id: credential.bundle_id.clone(),
            signer,
        }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProviderClaims {
    iss: String,
    iat: u64,
}

/// Signs and caches ES256 provider tokens.
pub struct ProviderTokenSigner {
    key: EncodingKey,
    key_id: String,
    team_id: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl ProviderTokenSigner {
    pub fn new(signing_key: &str, key_id: &str, team_id: &str) -> Result<Self, PushError> {
        Ok(Self {
            key: EncodingKey::from_ec_pem(signing_key.as_bytes())?,
            key_id: key_id.to_string(),
            team_id: team_id.to_string(),
            cached: Mutex::new(None),
        })
    }

    pub async fn token(&self) -> Result<String, PushError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, signed_at)) = cached.as_ref() {
            if signed_at.elapsed() < PROVIDER_TOKEN_LIFETIME {
                return Ok(token.clone());
            }
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let claims = ProviderClaims {
            iss: self.team_id.clone(),
            iat,
        };
        let token = encode(&header, &claims, &self.key)?;
        debug!(key_id = %self.key_id, "signed apns provider token");
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}

#[derive(Debug, Deserialize)]
struct ApnsErrorBody {
    reason: String,
}

struct ApnsHttpConnection {
    client: Client,
    base_url: String,
    bundle_id: String,
    signer: Option<ProviderTokenSigner>,
}

impl ApnsHttpConnection {
    fn body(payload: &PushPayload) -> Value {
        let mut body = payload.to_json();
        if let Some(map) = body.as_object_mut() {
            map.insert("aps".to_string(), json!({ "content-available": 1 }));
        }
        body
    }
}

#[async_trait]
impl ApnsConnection for ApnsHttpConnection {
    async fn send(&self, device_token: &str, payload: &PushPayload) -> Delivery {
        let url = format!("{}/3/device/{}", self.base_url, device_token);
        let mut request = self
            .client
            .post(url)
            .header("apns-topic", &self.bundle_id)
            .header("apns-push-type", "background")
            .header("apns-priority", "5")
            .json(&Self::body(payload));

        if let Some(signer) = &self.signer {
            match signer.token().await {
                Ok(token) => {
                    request = request.header(header::AUTHORIZATION, format!("bearer {token}"))
                }
                Err(e) => return Delivery::rejected(e.to_string()),
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(bundle_id = %self.bundle_id, "apns request failed: {}", e);
                return Delivery::retry(e.to_string());
            }
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Delivery::Sent;
        }
        let reason = response
            .json::<ApnsErrorBody>()
            .await
            .ok()
            .map(|body| body.reason);
        debug!(status, reason = ?reason, "apns rejected notification");
        classify(status, reason.as_deref())
    }

    async fn close(&self) {
        debug!(bundle_id = %self.bundle_id, "apns connection released");
    }
}
