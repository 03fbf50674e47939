// --- File: crates/pushgate_subscription/src/routes.rs ---
use crate::handlers::{
    index_handler, ping_handler, subscribe_handler, unregister_handler, unsubscribe_handler,
    verify_handler, SubscriptionState,
};
use crate::logic::SubscriptionService;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Creates a router with the five webhook endpoints.
pub fn routes(service: Arc<SubscriptionService>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/subscribe", post(subscribe_handler))
        .route("/unsubscribe", post(unsubscribe_handler))
        .route("/unregister", post(unregister_handler))
        .route("/callback", get(verify_handler).post(ping_handler))
        .with_state(SubscriptionState { service })
}
