//! Windows Notification Service, raw notifications posted to channel URIs.

use super::PushProvider;
use crate::error::PushError;
use crate::outcome::{Delivery, Outcome};
use crate::token::{client_credentials_token, TokenCache};
use async_trait::async_trait;
use futures::future::join_all;
use pushgate_common::credentials::WnsCredential;
use pushgate_common::{ProviderCredential, ProviderKind, PushPayload};
use reqwest::{header, Client, StatusCode};
use tracing::{debug, info, warn};

const WNS_SCOPE: &str = "notify.windows.com";

/// Maps a channel response status to a delivery result.
pub fn classify(status: StatusCode) -> Delivery {
    let reason = format!("http {}", status.as_u16());
    match status.as_u16() {
        200..=299 => Delivery::Sent,
        404 | 410 => Delivery::invalid(reason),
        406 => Delivery::rate_limited(reason),
        400..=499 => Delivery::rejected(reason),
        _ => Delivery::retry(reason),
    }
}

enum Attempt {
    Done(Delivery),
    Unauthorized,
}

pub struct WnsProvider {
    client: Client,
    token_endpoint: String,
    cache: TokenCache,
}

impl WnsProvider {
    pub fn new(client: Client, token_endpoint: String) -> Self {
        Self {
            client,
            token_endpoint,
            cache: TokenCache::new(),
        }
    }

    async fn token(&self, credential: &WnsCredential) -> Result<String, PushError> {
        self.cache
            .get_or_fetch(&credential.client_id, || {
                client_credentials_token(
                    &self.client,
                    &self.token_endpoint,
                    &credential.client_id,
                    &credential.client_secret,
                    Some(WNS_SCOPE),
                )
            })
            .await
    }

    async fn send_one(&self, token: &str, channel_uri: &str, body: &[u8]) -> Attempt {
        let response = match self
            .client
            .post(channel_uri)
            .bearer_auth(token)
            .header("X-WNS-Type", "wns/raw")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body.to_vec())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("wns request failed: {}", e);
                return Attempt::Done(Delivery::retry(e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Attempt::Unauthorized;
        }
        if !status.is_success() {
            let notification_status = response
                .headers()
                .get("X-WNS-Status")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string();
            debug!(status = status.as_u16(), notification_status, "wns refused notification");
        }
        Attempt::Done(classify(status))
    }

    async fn send_all(
        &self,
        token: &str,
        channels: &[&String],
        body: &[u8],
    ) -> Vec<(String, Attempt)> {
        let attempts = join_all(channels.iter().map(|uri| self.send_one(token, uri, body))).await;
        channels
            .iter()
            .map(|uri| uri.to_string())
            .zip(attempts)
            .collect()
    }
}

#[async_trait]
impl PushProvider for WnsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Wns
    }

    async fn send(
        &self,
        credential: &ProviderCredential,
        recipients: &[String],
        payload: &PushPayload,
    ) -> Result<Outcome, PushError> {
        let ProviderCredential::Wns(wns) = credential else {
            return Err(PushError::credential_mismatch(
                ProviderKind::Wns,
                credential.kind(),
            ));
        };

        let body = payload.to_json().to_string().into_bytes();
        let token = self.token(wns).await?;
        let all: Vec<&String> = recipients.iter().collect();
        let first = self.send_all(&token, &all, &body).await;

        let unauthorized: Vec<&String> = recipients
            .iter()
            .zip(&first)
            .filter(|(_, (_, attempt))| matches!(attempt, Attempt::Unauthorized))
            .map(|(uri, _)| uri)
            .collect();

        let mut second = Vec::new();
        if !unauthorized.is_empty() {
            info!(client_id = %wns.client_id, "wns token rejected, refreshing");
            self.cache.invalidate_stale(&wns.client_id, &token).await;
            let fresh = self.token(wns).await?;
            second = self.send_all(&fresh, &unauthorized, &body).await;
        }

        let mut outcome = Outcome::new();
        let mut retried = second.into_iter();
        for (uri, attempt) in first {
            let attempt = match attempt {
                Attempt::Unauthorized => retried
                    .next()
                    .map(|(_, again)| again)
                    .unwrap_or(Attempt::Unauthorized),
                done => done,
            };
            let delivery = match attempt {
                Attempt::Done(delivery) => delivery,
                Attempt::Unauthorized => classify(StatusCode::UNAUTHORIZED),
            };
            outcome.push(uri, delivery);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> ProviderCredential {
        ProviderCredential::Wns(WnsCredential {
            client_id: "ms-app://s-1-15".to_string(),
            client_secret: "secret".to_string(),
        })
    }

    fn payload() -> PushPayload {
        PushPayload {
            owner_id: "owner".to_string(),
            topic: None,
            data: json!({ "x": true }),
        }
    }

    fn token_response(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "bearer",
            "access_token": token,
            "expires_in": 86400
        }))
    }

    #[test]
    fn channel_statuses_are_classified() {
        assert_eq!(classify(StatusCode::OK), Delivery::Sent);
        assert_eq!(classify(StatusCode::GONE), Delivery::invalid("http 410"));
        assert_eq!(classify(StatusCode::NOT_FOUND), Delivery::invalid("http 404"));
        assert_eq!(
            classify(StatusCode::NOT_ACCEPTABLE),
            Delivery::rate_limited("http 406")
        );
        assert_eq!(
            classify(StatusCode::PAYLOAD_TOO_LARGE),
            Delivery::rejected("http 413")
        );
        assert_eq!(
            classify(StatusCode::SERVICE_UNAVAILABLE),
            Delivery::retry("http 503")
        );
    }

    #[tokio::test]
    async fn raw_notifications_use_the_cached_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("scope=notify.windows.com"))
            .respond_with(token_response("tok-1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/channel/a"))
            .and(header("authorization", "Bearer tok-1"))
            .and(header("x-wns-type", "wns/raw"))
            .and(header("content-type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/channel/b"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let provider = WnsProvider::new(Client::new(), format!("{}/token", server.uri()));
        let channels = vec![
            format!("{}/channel/a", server.uri()),
            format!("{}/channel/b", server.uri()),
        ];

        let outcome = provider
            .send(&credential(), &channels, &payload())
            .await
            .unwrap();
        assert_eq!(outcome.sent(), 1);
        assert_eq!(outcome.invalid_recipients(), vec![channels[1].as_str()]);

        let again = provider
            .send(&credential(), &channels[..1], &payload())
            .await
            .unwrap();
        assert_eq!(again.sent(), 1);
    }

    #[tokio::test]
    async fn rejected_tokens_are_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(token_response("old"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(token_response("new"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/channel"))
            .and(header("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/channel"))
            .and(header("authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = WnsProvider::new(Client::new(), format!("{}/token", server.uri()));
        let outcome = provider
            .send(
                &credential(),
                &[format!("{}/channel", server.uri())],
                &payload(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.sent(), 1);
    }

    #[tokio::test]
    async fn token_endpoint_failure_fails_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let provider = WnsProvider::new(Client::new(), format!("{}/token", server.uri()));
        let err = provider
            .send(&credential(), &["https://channel.invalid".to_string()], &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::AuthError(_)));
    }
}
