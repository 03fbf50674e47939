// Declare modules within this crate
pub mod credentials; // Typed provider credentials
pub mod error; // Error handling
pub mod http; // HTTP utilities
pub mod logging; // Logging utilities
pub mod models; // Shared data structures

// Re-export error types and utilities for easier access
pub use error::{
    persistence_error, validation_error, GatewayError, HttpStatusCode,
};

// Re-export HTTP utilities for easier access
pub use http::{client::create_client, IntoHttpResponse};

// Re-export logging utilities for easier access
pub use logging::{init, init_with_file, init_with_level, parse_level};

pub use credentials::{CredentialError, ProviderCredential, ProviderKind};
pub use models::{Device, DeviceFilter, DeviceType, HubSubscription, PushPayload};
