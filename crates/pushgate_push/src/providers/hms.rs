//! Huawei Push Kit. One batch request per job; results are all-or-nothing.

use super::PushProvider;
use crate::error::PushError;
use crate::outcome::{Delivery, Outcome};
use crate::token::{client_credentials_token, TokenCache};
use async_trait::async_trait;
use pushgate_common::credentials::HmsCredential;
use pushgate_common::{ProviderCredential, ProviderKind, PushPayload};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

const SUCCESS: &str = "80000000";
/// Codes meaning the access token was refused.
const TOKEN_REJECTED: [&str; 2] = ["80200001", "80200003"];

#[derive(Debug, Default, Deserialize)]
struct SendResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
}

enum Attempt {
    Done(Delivery),
    TokenRejected,
}

pub struct HmsProvider {
    client: Client,
    token_endpoint: String,
    push_base: String,
    cache: TokenCache,
}

impl HmsProvider {
    pub fn new(client: Client, token_endpoint: String, push_base: String) -> Self {
        Self {
            client,
            token_endpoint,
            push_base,
            cache: TokenCache::new(),
        }
    }

    async fn token(&self, credential: &HmsCredential) -> Result<String, PushError> {
        self.cache
            .get_or_fetch(&credential.app_id, || {
                client_credentials_token(
                    &self.client,
                    &self.token_endpoint,
                    &credential.app_id,
                    &credential.app_secret,
                    None,
                )
            })
            .await
    }

    async fn send_batch(&self, credential: &HmsCredential, token: &str, body: &Value) -> Attempt {
        let url = format!("{}/v1/{}/messages:send", self.push_base, credential.app_id);
        let response = match self.client.post(url).bearer_auth(token).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(app_id = %credential.app_id, "hms request failed: {}", e);
                return Attempt::Done(Delivery::retry(e.to_string()));
            }
        };

        let status = response.status();
        let parsed = response.json::<SendResponse>().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || TOKEN_REJECTED.contains(&parsed.code.as_str()) {
            return Attempt::TokenRejected;
        }
        if status != StatusCode::OK {
            return Attempt::Done(Delivery::retry(format!(
                "http {}: {}",
                status.as_u16(),
                parsed.msg
            )));
        }
        if parsed.code != SUCCESS {
            warn!(app_id = %credential.app_id, code = %parsed.code, msg = %parsed.msg, "hms accepted batch with a non-success code");
        }
        Attempt::Done(Delivery::Sent)
    }
}

#[async_trait]
impl PushProvider for HmsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hms
    }

    async fn send(
        &self,
        credential: &ProviderCredential,
        recipients: &[String],
        payload: &PushPayload,
    ) -> Result<Outcome, PushError> {
        let ProviderCredential::Hms(hms) = credential else {
            return Err(PushError::credential_mismatch(
                ProviderKind::Hms,
                credential.kind(),
            ));
        };

        let body = json!({
            "validate_only": false,
            "message": {
                "data": payload.to_json().to_string(),
                "token": recipients,
            }
        });

        let token = self.token(hms).await?;
        let delivery = match self.send_batch(hms, &token, &body).await {
            Attempt::Done(delivery) => delivery,
            Attempt::TokenRejected => {
                info!(app_id = %hms.app_id, "hms token rejected, refreshing");
                self.cache.invalidate_stale(&hms.app_id, &token).await;
                let fresh = self.token(hms).await?;
                match self.send_batch(hms, &fresh, &body).await {
                    Attempt::Done(delivery) => delivery,
                    Attempt::TokenRejected => Delivery::retry("access token rejected"),
                }
            }
        };
        Ok(Outcome::uniform(recipients, delivery))
    }
}
