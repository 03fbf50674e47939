// File: crates/pushgate_subscription/src/doc.rs
#![cfg(feature = "openapi")]

use crate::handlers;
use crate::logic::{PingReport, SubscribeRequest, UnregisterRequest, UnsubscribeRequest};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::index_handler,
        handlers::subscribe_handler,
        handlers::unsubscribe_handler,
        handlers::unregister_handler,
        handlers::verify_handler,
        handlers::ping_handler,
    ),
    components(schemas(SubscribeRequest, UnsubscribeRequest, UnregisterRequest, PingReport)),
    tags((name = "Subscription", description = "PubSubHubbub webhook endpoints"))
)]
pub struct SubscriptionApiDoc;
