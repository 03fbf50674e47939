// --- File: crates/services/pushgate_backend/src/app_state.rs ---
use pushgate_config::AppConfig;
use pushgate_push::PushRouter;
use pushgate_subscription::SubscriptionService;
use std::sync::Arc;

/// Application state that is shared across the server's lifetime.
///
/// Holds the loaded configuration and the two services every request path ends in:
/// the subscription controller behind the webhook routes, and the push router the
/// queues dispatch into. Both are behind `Arc`s, so cloning the state is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The configuration loaded at startup.
    pub config: Arc<AppConfig>,

    /// Routes push jobs to provider adapters and keeps per-credential counters.
    pub router: Arc<PushRouter>,

    /// Subscription controller serving the webhook endpoints.
    pub service: Arc<SubscriptionService>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: Arc<AppConfig>,
        router: Arc<PushRouter>,
        service: Arc<SubscriptionService>,
    ) -> Self {
        Self {
            config,
            router,
            service,
        }
    }

    /// `host:port` the server listens on.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}
