// File: crates/pushgate_subscription/src/handlers.rs
use crate::error::VerificationError;
use crate::hub::HubResponse;
use crate::logic::{
    PingReport, SubscribeRequest, SubscriptionService, UnregisterRequest, UnsubscribeRequest,
    VerificationQuery,
};
use axum::{
    body::Bytes,
    extract::{FromRequest, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pushgate_common::{validation_error, GatewayError, HttpStatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared state of the webhook routes.
#[derive(Clone)]
pub struct SubscriptionState {
    pub service: Arc<SubscriptionService>,
}

/// Request body accepted either form-encoded or as JSON, chosen by `Content-Type`.
pub struct WebhookBody<T>(pub T);

impl<S, T> FromRequest<S> for WebhookBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| validation_error(format!("unreadable body: {e}")))?;

        let value = if is_json {
            serde_json::from_slice(&bytes)?
        } else {
            serde_urlencoded::from_bytes(&bytes)
                .map_err(|e| validation_error(format!("malformed form body: {e}")))?
        };
        Ok(WebhookBody(value))
    }
}

impl IntoResponse for HubResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        (status, self.body).into_response()
    }
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.to_string()).into_response()
    }
}

/// Names the callback URI hubs are given.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Effective callback URI", body = String)),
    tag = "Subscription"
))]
pub async fn index_handler(State(state): State<SubscriptionState>) -> String {
    format!("callback: {}", state.service.callback_uri())
}

#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/subscribe",
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Hub response, proxied"),
        (status = 400, description = "Missing field"),
        (status = 500, description = "Store failure"),
        (status = 503, description = "Hub unreachable")
    ),
    tag = "Subscription"
))]
pub async fn subscribe_handler(
    State(state): State<SubscriptionState>,
    WebhookBody(request): WebhookBody<SubscribeRequest>,
) -> Result<HubResponse, GatewayError> {
    state.service.subscribe(request).await
}

#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/unsubscribe",
    request_body = UnsubscribeRequest,
    responses(
        (status = 200, description = "Hub response, proxied"),
        (status = 400, description = "Missing field"),
        (status = 500, description = "Store failure"),
        (status = 503, description = "Hub unreachable")
    ),
    tag = "Subscription"
))]
pub async fn unsubscribe_handler(
    State(state): State<SubscriptionState>,
    WebhookBody(request): WebhookBody<UnsubscribeRequest>,
) -> Result<HubResponse, GatewayError> {
    state.service.unsubscribe(request).await
}

#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/unregister",
    request_body = UnregisterRequest,
    responses(
        (status = 200, description = "Device records deleted", body = String),
        (status = 400, description = "Missing field"),
        (status = 500, description = "Store failure")
    ),
    tag = "Subscription"
))]
pub async fn unregister_handler(
    State(state): State<SubscriptionState>,
    WebhookBody(request): WebhookBody<UnregisterRequest>,
) -> Result<&'static str, GatewayError> {
    state.service.unregister(request).await?;
    Ok("succeeded")
}

#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/callback",
    params(VerificationQuery),
    responses(
        (status = 200, description = "Challenge echoed", body = String),
        (status = 401, description = "Missing owner_id"),
        (status = 403, description = "Missing hub.challenge"),
        (status = 404, description = "Missing hub.mode"),
        (status = 405, description = "No device subscribed to the topic")
    ),
    tag = "Subscription"
))]
pub async fn verify_handler(
    State(state): State<SubscriptionState>,
    Query(query): Query<VerificationQuery>,
) -> Result<String, VerificationError> {
    state.service.verify(query).await
}

#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/callback",
    request_body(content = String, description = "JSON array of {owner_id, topic, object_data}", content_type = "application/json"),
    responses(
        (status = 202, description = "Every entry accepted", body = PingReport),
        (status = 200, description = "Some entries were malformed or could not be queued", body = PingReport),
        (status = 400, description = "Body is not a JSON array")
    ),
    tag = "Subscription"
))]
pub async fn ping_handler(
    State(state): State<SubscriptionState>,
    body: Bytes,
) -> Result<(StatusCode, Json<PingReport>), GatewayError> {
    let body: serde_json::Value = serde_json::from_slice(&body)?;
    let report = state.service.deliver(body).await?;
    info!(
        accepted = report.accepted,
        skipped = report.skipped,
        jobs = report.jobs,
        failed = report.failed,
        "ping processed"
    );

    let status = if report.fully_accepted() {
        StatusCode::ACCEPTED
    } else {
        debug!(
            skipped = report.skipped,
            failed = report.failed,
            "ping was only partly accepted"
        );
        StatusCode::OK
    };
    Ok((status, Json(report)))
}
