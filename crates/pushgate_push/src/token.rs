//! OAuth2 access tokens for the Google, Microsoft and Huawei transports.

use crate::error::PushError;
use async_trait::async_trait;
use pushgate_common::credentials::FcmCredential;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use yup_oauth2::{parse_service_account_key, ServiceAccountAuthenticator};

/// Scope required by the HTTP v1 messaging API.
pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Tokens are refreshed this long before the provider says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Access tokens keyed by credential identity.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token for `key`, fetching a new one when absent or expired.
    ///
    /// `fetch` yields the token and its lifetime. Concurrent callers wait for a single
    /// fetch instead of each asking the provider.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<String, PushError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration), PushError>>,
    {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(key) {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let (value, lifetime) = fetch().await?;
        debug!(key, lifetime_secs = lifetime.as_secs(), "fetched access token");
        tokens.insert(
            key.to_string(),
            CachedToken {
                value: value.clone(),
                expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
            },
        );
        Ok(value)
    }

    /// Forgets the token for `key`, typically after the provider rejected it.
    pub async fn invalidate(&self, key: &str) {
        self.tokens.lock().await.remove(key);
    }

    /// Forgets the token for `key` only if it is still `stale`, so a token refreshed
    /// by a concurrent request survives.
    pub async fn invalidate_stale(&self, key: &str, stale: &str) {
        let mut tokens = self.tokens.lock().await;
        if tokens.get(key).is_some_and(|t| t.value == stale) {
            tokens.remove(key);
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Performs an OAuth2 client-credentials grant against `endpoint`.
pub async fn client_credentials_token(
    client: &Client,
    endpoint: &str,
    client_id: &str,
    client_secret: &str,
    scope: Option<&str>,
) -> Result<(String, Duration), PushError> {
    let mut form = vec![
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    if let Some(scope) = scope {
        form.push(("scope", scope));
    }

    let response = client.post(endpoint).form(&form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PushError::AuthError(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| PushError::AuthError(format!("malformed token response: {e}")))?;
    Ok((
        token.access_token,
        Duration::from_secs(token.expires_in.unwrap_or(3600)),
    ))
}

/// Source of bearer tokens for the HTTP v1 Google transport.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self, credential: &FcmCredential) -> Result<String, PushError>;
}

/// Signs service account assertions with yup-oauth2 and caches the resulting tokens.
#[derive(Debug, Default)]
pub struct ServiceAccountTokenSource {
    cache: TokenCache,
}

impl ServiceAccountTokenSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self, credential: &FcmCredential) -> Result<String, PushError> {
        let key = format!("{}/{}", credential.project_id, credential.client_email);
        self.cache
            .get_or_fetch(&key, move || async move {
                let sa_key = parse_service_account_key(credential.service_account.to_string())
                    .map_err(|e| PushError::CredentialError(format!("service account: {e}")))?;
                let auth = ServiceAccountAuthenticator::builder(sa_key)
                    .build()
                    .await
                    .map_err(|e| PushError::AuthError(e.to_string()))?;
                let token = auth
                    .token(&[FCM_SCOPE])
                    .await
                    .map_err(|e| PushError::AuthError(e.to_string()))?;
                let value = token
                    .token()
                    .ok_or_else(|| PushError::AuthError("No token available".to_string()))?;
                // Google access tokens live for an hour
                Ok((value.to_string(), Duration::from_secs(3600)))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test(start_paused = true)]
    async fn cached_tokens_are_reused_until_expiry() {
        let cache = TokenCache::new();
        let fetches = AtomicUsize::new(0);
        let fetches = &fetches;
        let fetch = move || async move {
            let n = fetches.fetch_add(1, Ordering::SeqCst);
            Ok((format!("token-{n}"), Duration::from_secs(120)))
        };

        assert_eq!(cache.get_or_fetch("k", fetch).await.unwrap(), "token-0");
        assert_eq!(cache.get_or_fetch("k", fetch).await.unwrap(), "token-0");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get_or_fetch("k", fetch).await.unwrap(), "token-1");

        cache.invalidate("k").await;
        assert_eq!(cache.get_or_fetch("k", fetch).await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn client_credentials_grant_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("scope=notify.windows.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "bearer",
                "expires_in": 86400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (token, lifetime) = client_credentials_token(
            &Client::new(),
            &format!("{}/token", server.uri()),
            "id",
            "secret",
            Some("notify.windows.com"),
        )
        .await
        .unwrap();

        assert_eq!(token, "abc");
        assert_eq!(lifetime, Duration::from_secs(86400));
    }

    #[tokio::test]
    async fn token_endpoint_errors_are_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let err = client_credentials_token(&Client::new(), &server.uri(), "id", "bad", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::AuthError(msg) if msg.contains("invalid_client")));
    }
}
