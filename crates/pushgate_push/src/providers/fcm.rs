//! Google HTTP v1 transport, authenticated with a service account.

use super::PushProvider;
use crate::error::PushError;
use crate::outcome::{Delivery, Outcome};
use crate::token::AccessTokenSource;
use async_trait::async_trait;
use futures::future::join_all;
use pushgate_common::credentials::FcmCredential;
use pushgate_common::{ProviderCredential, ProviderKind, PushPayload};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

/// Normalizes an HTTP v1 error into the dotted codes used for classification.
fn error_code(status: StatusCode, body: &ErrorEnvelope) -> String {
    let code = body
        .error
        .details
        .iter()
        .find_map(|d| d.error_code.as_deref())
        .or(body.error.status.as_deref());

    let code = match code {
        Some("INVALID_ARGUMENT") => {
            if body.error.message.to_lowercase().contains("registration token") {
                "invalid-registration-token"
            } else {
                "invalid-argument"
            }
        }
        Some("UNREGISTERED" | "NOT_FOUND") => "registration-token-not-registered",
        Some("SENDER_ID_MISMATCH" | "PERMISSION_DENIED") => "mismatched-credential",
        Some("QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED") => "message-rate-exceeded",
        Some("UNAVAILABLE") => "server-unavailable",
        Some("INTERNAL") => "internal-error",
        Some("THIRD_PARTY_AUTH_ERROR") => "third-party-auth-error",
        Some("UNAUTHENTICATED") => "authentication-error",
        Some(_) => "unknown-error",
        None => match status {
            StatusCode::TOO_MANY_REQUESTS => "message-rate-exceeded",
            StatusCode::UNAUTHORIZED => "authentication-error",
            s if s.is_server_error() => "server-unavailable",
            _ => "unknown-error",
        },
    };
    code.to_string()
}

/// Maps a normalized error code to a delivery result.
pub fn classify(code: &str) -> Delivery {
    match code {
        "internal-error" | "server-unavailable" => Delivery::retry(code),
        "device-message-rate-exceeded" | "message-rate-exceeded" => Delivery::rate_limited(code),
        "authentication-error"
        | "invalid-recipient"
        | "invalid-registration-token"
        | "mismatched-credential"
        | "registration-token-not-registered" => Delivery::invalid(code),
        c if c.starts_with("invalid-") && c.ends_with("-credentials") => Delivery::invalid(code),
        _ => Delivery::rejected(code),
    }
}

pub struct FcmProvider {
    client: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl FcmProvider {
    pub fn new(client: Client, base_url: String, tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            client,
            base_url,
            tokens,
        }
    }

    async fn send_one(
        &self,
        credential: &FcmCredential,
        access_token: &str,
        token: &str,
        payload: &PushPayload,
    ) -> Delivery {
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, credential.project_id
        );
        let body = json!({
            "message": {
                "token": token,
                "data": payload.to_string_map(),
                "android": { "priority": "high" },
            }
        });

        let response = match self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(project_id = %credential.project_id, "fcm request failed: {}", e);
                return Delivery::retry(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            return Delivery::Sent;
        }
        let envelope = response.json::<ErrorEnvelope>().await.unwrap_or_default();
        let code = error_code(status, &envelope);
        debug!(status = status.as_u16(), code = %code, "fcm refused message");
        classify(&code)
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fcm
    }

    async fn send(
        &self,
        credential: &ProviderCredential,
        recipients: &[String],
        payload: &PushPayload,
    ) -> Result<Outcome, PushError> {
        let ProviderCredential::Fcm(fcm) = credential else {
            return Err(PushError::credential_mismatch(
                ProviderKind::Fcm,
                credential.kind(),
            ));
        };

        let access_token = self.tokens.access_token(fcm).await?;
        let deliveries = join_all(
            recipients
                .iter()
                .map(|token| self.send_one(fcm, &access_token, token, payload)),
        )
        .await;

        let mut outcome = Outcome::new();
        for (token, delivery) in recipients.iter().zip(deliveries) {
            outcome.push(token.clone(), delivery);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticToken;

    #[async_trait]
    impl AccessTokenSource for StaticToken {
        async fn access_token(&self, _credential: &FcmCredential) -> Result<String, PushError> {
            Ok("ya29.test".to_string())
        }
    }

    struct NoToken;

    #[async_trait]
    impl AccessTokenSource for NoToken {
        async fn access_token(&self, _credential: &FcmCredential) -> Result<String, PushError> {
            Err(PushError::AuthError("invalid_grant".to_string()))
        }
    }

    fn credential() -> ProviderCredential {
        ProviderCredential::Fcm(FcmCredential {
            project_id: "demo-project".to_string(),
            client_email: "push@demo-project.iam.gserviceaccount.com".to_string(),
            service_account: json!({}),
        })
    }

    fn payload() -> PushPayload {
        PushPayload {
            owner_id: "owner".to_string(),
            topic: Some("news".to_string()),
            data: json!({ "id": 7 }),
        }
    }

    fn v1_error(status: &str, error_code: Option<&str>, message: &str) -> Value {
        let details = match error_code {
            Some(code) => json!([{
                "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                "errorCode": code
            }]),
            None => json!([]),
        };
        json!({ "error": { "code": 400, "message": message, "status": status, "details": details } })
    }

    async fn reply(server: &MockServer, token: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo-project/messages:send"))
            .and(header("authorization", "Bearer ya29.test"))
            .and(body_partial_json(json!({ "message": { "token": token } })))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn codes_are_normalized_and_classified() {
        let envelope: ErrorEnvelope = serde_json::from_value(v1_error(
            "NOT_FOUND",
            Some("UNREGISTERED"),
            "Requested entity was not found.",
        ))
        .unwrap();
        let code = error_code(StatusCode::NOT_FOUND, &envelope);
        assert_eq!(code, "registration-token-not-registered");
        assert_eq!(classify(&code), Delivery::invalid(code.clone()));

        let envelope: ErrorEnvelope = serde_json::from_value(v1_error(
            "INVALID_ARGUMENT",
            None,
            "The registration token is not a valid FCM registration token",
        ))
        .unwrap();
        assert_eq!(
            error_code(StatusCode::BAD_REQUEST, &envelope),
            "invalid-registration-token"
        );

        assert_eq!(
            error_code(StatusCode::SERVICE_UNAVAILABLE, &ErrorEnvelope::default()),
            "server-unavailable"
        );
        assert_eq!(
            classify("message-rate-exceeded"),
            Delivery::rate_limited("message-rate-exceeded")
        );
        assert_eq!(
            classify("invalid-apns-credentials"),
            Delivery::invalid("invalid-apns-credentials")
        );
        assert_eq!(
            classify("invalid-argument"),
            Delivery::rejected("invalid-argument")
        );
    }

    #[tokio::test]
    async fn data_is_sent_as_a_string_map() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "message": {
                    "data": { "owner_id": "owner", "topic": "news", "object_data": "{\"id\":7}" },
                    "android": { "priority": "high" }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo-project/messages/1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = FcmProvider::new(Client::new(), server.uri(), Arc::new(StaticToken));
        let outcome = provider
            .send(&credential(), &["tok".to_string()], &payload())
            .await
            .unwrap();
        assert_eq!(outcome.sent(), 1);
    }

    #[tokio::test]
    async fn per_token_errors_are_classified() {
        let server = MockServer::start().await;
        reply(&server, "ok", ResponseTemplate::new(200)).await;
        reply(
            &server,
            "gone",
            ResponseTemplate::new(404).set_body_json(v1_error(
                "NOT_FOUND",
                Some("UNREGISTERED"),
                "Requested entity was not found.",
            )),
        )
        .await;
        reply(
            &server,
            "hot",
            ResponseTemplate::new(429).set_body_json(v1_error(
                "RESOURCE_EXHAUSTED",
                Some("QUOTA_EXCEEDED"),
                "Quota exceeded",
            )),
        )
        .await;

        let provider = FcmProvider::new(Client::new(), server.uri(), Arc::new(StaticToken));
        let recipients = vec!["ok".to_string(), "gone".to_string(), "hot".to_string()];
        let outcome = provider
            .send(&credential(), &recipients, &payload())
            .await
            .unwrap();

        assert_eq!(outcome.sent(), 1);
        assert_eq!(outcome.invalid_recipients(), vec!["gone"]);
        assert_eq!(outcome.retry_recipients(), vec!["hot"]);
        assert_eq!(outcome.rate_limited(), 1);
    }

    #[tokio::test]
    async fn token_failures_abort_the_call() {
        let server = MockServer::start().await;
        let provider = FcmProvider::new(Client::new(), server.uri(), Arc::new(NoToken));

        let err = provider
            .send(&credential(), &["tok".to_string()], &payload())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
