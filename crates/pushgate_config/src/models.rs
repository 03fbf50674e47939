use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- General Server Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

// --- Database Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String, // e.g. sqlite:data/pushgate.db, via PUSHGATE__DATABASE__URL
}

// --- Outbound HTTP ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    /// Timeout applied to every outbound request (hubs, token endpoints, providers).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

// --- Push job queue ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    /// Total delivery attempts per job, the first one included.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Lifetime of a job measured from enqueue.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Jobs in flight per device type queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1_000
}

fn default_ttl_secs() -> u64 {
    3_600
}

fn default_concurrency() -> usize {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            ttl_secs: default_ttl_secs(),
            concurrency: default_concurrency(),
        }
    }
}

// --- Provider endpoints (overridable for sandboxes and tests) ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderEndpoints {
    #[serde(default = "default_apns_production")]
    pub apns_production: String,
    #[serde(default = "default_apns_sandbox")]
    pub apns_sandbox: String,
    #[serde(default = "default_gcm")]
    pub gcm: String,
    #[serde(default = "default_fcm")]
    pub fcm: String,
    #[serde(default = "default_wns_token")]
    pub wns_token: String,
    #[serde(default = "default_hms_token")]
    pub hms_token: String,
    #[serde(default = "default_hms_push")]
    pub hms_push: String,
}

fn default_apns_production() -> String {
    "https://api.push.apple.com".to_string()
}

fn default_apns_sandbox() -> String {
    "https://api.sandbox.push.apple.com".to_string()
}

fn default_gcm() -> String {
    "https://fcm.googleapis.com/fcm/send".to_string()
}

fn default_fcm() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_wns_token() -> String {
    "https://login.live.com/accesstoken.srf".to_string()
}

fn default_hms_token() -> String {
    "https://oauth-login.cloud.huawei.com/oauth2/v3/token".to_string()
}

fn default_hms_push() -> String {
    "https://push-api.cloud.huawei.com".to_string()
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            apns_production: default_apns_production(),
            apns_sandbox: default_apns_sandbox(),
            gcm: default_gcm(),
            fcm: default_fcm(),
            wns_token: default_wns_token(),
            hms_token: default_hms_token(),
            hms_push: default_hms_push(),
        }
    }
}

/// Process-wide fallback credentials, one raw blob per provider.
///
/// The blobs are validated into typed credentials by the push crate at startup, so a
/// malformed default is reported before the first job is processed.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DefaultCredentials {
    #[serde(default)]
    pub apns: Option<Value>,
    #[serde(default)]
    pub gcm: Option<Value>,
    #[serde(default)]
    pub fcm: Option<Value>,
    #[serde(default)]
    pub wns: Option<Value>,
    #[serde(default)]
    pub hms: Option<Value>,
}

// --- Push delivery ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PushConfig {
    /// Route android devices through the modern Google transport instead of the legacy one.
    #[serde(default)]
    pub use_fcm_v1: bool,
    /// Idle time after which a pooled Apple connection is swept.
    #[serde(default = "default_apns_pool_ttl_secs")]
    pub apns_pool_ttl_secs: u64,
    #[serde(default)]
    pub endpoints: ProviderEndpoints,
    #[serde(default)]
    pub defaults: DefaultCredentials,
}

fn default_apns_pool_ttl_secs() -> u64 {
    3_600
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            use_fcm_v1: false,
            apns_pool_ttl_secs: default_apns_pool_ttl_secs(),
            endpoints: ProviderEndpoints::default(),
            defaults: DefaultCredentials::default(),
        }
    }
}

// --- Logging ---
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error. Defaults to info.
    #[serde(default)]
    pub level: Option<String>,
    /// When set, logs are also written to a daily rolling file in this directory.
    #[serde(default)]
    pub dir: Option<String>,
}

// --- Unified App Configuration ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    // Server config is mandatory
    pub server: ServerConfig,

    /// Public URL of the callback endpoint, announced to hubs as `hub.callback`.
    pub callback_uri: String,

    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            callback_uri: "http://127.0.0.1:8080/callback".to_string(),
            database: None,
            http: HttpConfig::default(),
            queue: QueueConfig::default(),
            push: PushConfig::default(),
            log: LogConfig::default(),
        }
    }
}
