//! Outbound subscription requests to upstream hubs.

use crate::error::HubError;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

/// `hub.mode` values understood by hubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
}

impl HubMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubMode::Subscribe => "subscribe",
            HubMode::Unsubscribe => "unsubscribe",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subscribe" => Some(HubMode::Subscribe),
            "unsubscribe" => Some(HubMode::Unsubscribe),
            _ => None,
        }
    }
}

/// What the hub answered, passed back to the webhook caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubResponse {
    pub status: u16,
    pub body: String,
}

impl HubResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Reads the `hub.topic` query parameter of a hub URI.
pub fn topic_from_hub_uri(hub_uri: &str) -> Option<String> {
    let url = Url::parse(hub_uri).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "hub.topic")
        .map(|(_, value)| value.into_owned())
        .filter(|topic| !topic.is_empty())
}

#[derive(Clone)]
pub struct HubClient {
    client: Client,
    callback_uri: String,
}

impl HubClient {
    /// `client` should carry a request timeout; see `pushgate_common::create_client`.
    pub fn new(client: Client, callback_uri: impl Into<String>) -> Self {
        Self {
            client,
            callback_uri: callback_uri.into(),
        }
    }

    pub fn callback_uri(&self) -> &str {
        &self.callback_uri
    }

    /// Sends a form-encoded subscription change to `hub_uri`.
    ///
    /// Any HTTP answer, successful or not, is returned as a [`HubResponse`]; only
    /// transport failures are errors.
    pub async fn request(
        &self,
        hub_uri: &str,
        mode: HubMode,
        topic: &str,
        owner_id: &str,
        oauth_token: Option<&str>,
    ) -> Result<HubResponse, HubError> {
        let url = Url::parse(hub_uri).map_err(|_| HubError::InvalidUri(hub_uri.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HubError::InvalidUri(hub_uri.to_string()));
        }

        let mut form = vec![
            ("hub.callback", self.callback_uri.as_str()),
            ("hub.mode", mode.as_str()),
            ("hub.topic", topic),
            ("owner_id", owner_id),
        ];
        if let (HubMode::Subscribe, Some(token)) = (mode, oauth_token) {
            form.push(("oauth_token", token));
        }

        debug!(hub_uri, mode = mode.as_str(), topic, owner_id, "sending hub request");
        let response = self.client.post(url).form(&form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        info!(hub_uri, mode = mode.as_str(), status, "hub answered");
        Ok(HubResponse { status, body })
    }

    pub async fn subscribe(
        &self,
        hub_uri: &str,
        topic: &str,
        owner_id: &str,
        oauth_token: &str,
    ) -> Result<HubResponse, HubError> {
        self.request(hub_uri, HubMode::Subscribe, topic, owner_id, Some(oauth_token))
            .await
    }

    pub async fn unsubscribe(
        &self,
        hub_uri: &str,
        topic: &str,
        owner_id: &str,
    ) -> Result<HubResponse, HubError> {
        self.request(hub_uri, HubMode::Unsubscribe, topic, owner_id, None)
            .await
    }
}
