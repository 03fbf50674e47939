//! Legacy Google transport, authenticated with a server API key.

use super::PushProvider;
use crate::error::PushError;
use crate::outcome::{Delivery, Outcome};
use async_trait::async_trait;
use futures::future::join_all;
use pushgate_common::credentials::GcmCredential;
use pushgate_common::{ProviderCredential, ProviderKind, PushPayload};
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    results: Vec<SendResult>,
}

#[derive(Debug, Deserialize)]
struct SendResult {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Maps a legacy per-recipient error code to a delivery result.
///
/// A missing code on an unsuccessful result is treated as transient.
pub fn classify(error: Option<&str>) -> Delivery {
    match error {
        None => Delivery::retry("unknown"),
        Some(code @ ("Unavailable" | "InternalServerError")) => Delivery::retry(code),
        Some(code @ ("DeviceMessageRateExceeded" | "TopicsMessageRateExceeded")) => {
            Delivery::rate_limited(code)
        }
        Some(
            code @ ("MissingRegistration" | "InvalidRegistration" | "NotRegistered"
            | "InvalidPackageName" | "MismatchSenderId"),
        ) => Delivery::invalid(code),
        Some(code) => Delivery::rejected(code),
    }
}

pub struct GcmProvider {
    client: Client,
    endpoint: String,
}

impl GcmProvider {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    async fn send_one(&self, credential: &GcmCredential, to: &str, payload: &PushPayload) -> Delivery {
        let body = json!({
            "to": to,
            "data": payload.to_json(),
            "priority": "high",
        });

        let response = match self
            .client
            .post(&self.endpoint)
            .header(header::AUTHORIZATION, format!("key={}", credential.api_key))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("gcm request failed: {}", e);
                return Delivery::retry(e.to_string());
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return Delivery::retry(format!("http {}", status.as_u16()));
        }
        if !status.is_success() {
            return Delivery::rejected(format!("http {}", status.as_u16()));
        }

        match response.json::<SendResponse>().await {
            Ok(parsed) => match parsed.results.into_iter().next() {
                Some(SendResult {
                    message_id: Some(_),
                    error: None,
                }) => Delivery::Sent,
                Some(result) => classify(result.error.as_deref()),
                None => classify(None),
            },
            Err(e) => Delivery::retry(format!("malformed response: {e}")),
        }
    }
}

#[async_trait]
impl PushProvider for GcmProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gcm
    }

    async fn send(
        &self,
        credential: &ProviderCredential,
        recipients: &[String],
        payload: &PushPayload,
    ) -> Result<Outcome, PushError> {
        let ProviderCredential::Gcm(gcm) = credential else {
            return Err(PushError::credential_mismatch(
                ProviderKind::Gcm,
                credential.kind(),
            ));
        };

        let deliveries = join_all(recipients.iter().map(|to| self.send_one(gcm, to, payload))).await;
        let mut outcome = Outcome::new();
        for (to, delivery) in recipients.iter().zip(deliveries) {
            outcome.push(to.clone(), delivery);
        }
        Ok(outcome)
    }
}
