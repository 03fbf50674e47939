//! Typed provider credentials.
//!
//! Stored credentials are free-form JSON blobs keyed by `(provider, project_id)`.
//! They are turned into a [`ProviderCredential`] here, so every adapter receives a
//! value whose shape was already checked.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Push transports known to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Apple Push Notification service
    Apns,
    /// Legacy Google transport (server key)
    Gcm,
    /// Modern Google transport (service account, HTTP v1)
    Fcm,
    /// Microsoft Windows Notification Service
    Wns,
    /// Huawei Push Kit
    Hms,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Apns,
        ProviderKind::Gcm,
        ProviderKind::Fcm,
        ProviderKind::Wns,
        ProviderKind::Hms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Apns => "apns",
            ProviderKind::Gcm => "gcm",
            ProviderKind::Fcm => "fcm",
            ProviderKind::Wns => "wns",
            ProviderKind::Hms => "hms",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        ProviderKind::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    #[error("{provider} credential is missing `{field}`")]
    MissingField {
        provider: ProviderKind,
        field: &'static str,
    },

    #[error("{provider} credential is ambiguous: {reason}")]
    Ambiguous {
        provider: ProviderKind,
        reason: String,
    },

    #[error("{provider} credential is invalid: {reason}")]
    Invalid {
        provider: ProviderKind,
        reason: String,
    },
}

/// How an Apple credential authenticates.
#[derive(Clone, PartialEq)]
pub enum ApnsAuth {
    /// TLS client certificate and its private key, both PEM.
    Certificate { cert: String, key: String },
    /// `.p8` signing key used to mint provider tokens.
    Token {
        signing_key: String,
        key_id: String,
        team_id: String,
    },
}

#[derive(Clone, PartialEq)]
pub struct ApnsCredential {
    /// App bundle identifier, sent as `apns-topic`.
    pub bundle_id: String,
    pub production: bool,
    pub auth: ApnsAuth,
}

impl ApnsCredential {
    /// Structural identity used to share pooled connections.
    ///
    /// Two credentials with the same bundle, environment and certificate (or signing
    /// key) bytes produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.bundle_id.as_bytes());
        hasher.update([0, self.production as u8, 0]);
        match &self.auth {
            ApnsAuth::Certificate { cert, .. } => {
                hasher.update(b"cert");
                hasher.update(cert.as_bytes());
            }
            ApnsAuth::Token { signing_key, .. } => {
                hasher.update(b"token");
                hasher.update(signing_key.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Clone, PartialEq)]
pub struct GcmCredential {
    pub api_key: String,
}

#[derive(Clone, PartialEq)]
pub struct FcmCredential {
    /// Google project the service account belongs to.
    pub project_id: String,
    pub client_email: String,
    /// The complete service account key document.
    pub service_account: Value,
}

#[derive(Clone, PartialEq)]
pub struct WnsCredential {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone, PartialEq)]
pub struct HmsCredential {
    pub app_id: String,
    pub app_secret: String,
}

/// A validated credential, tagged by provider.
#[derive(Clone, PartialEq)]
pub enum ProviderCredential {
    Apns(ApnsCredential),
    Gcm(GcmCredential),
    Fcm(FcmCredential),
    Wns(WnsCredential),
    Hms(HmsCredential),
}

impl ProviderCredential {
    /// Validates a stored configuration blob for `kind`.
    pub fn from_config(kind: ProviderKind, config: &Value) -> Result<Self, CredentialError> {
        let map = config.as_object().ok_or_else(|| CredentialError::Invalid {
            provider: kind,
            reason: "configuration must be a JSON object".to_string(),
        })?;

        match kind {
            ProviderKind::Apns => apns_from_config(map).map(ProviderCredential::Apns),
            ProviderKind::Gcm => Ok(ProviderCredential::Gcm(GcmCredential {
                api_key: required(map, kind, "api_key")?,
            })),
            ProviderKind::Fcm => fcm_from_config(map).map(ProviderCredential::Fcm),
            ProviderKind::Wns => Ok(ProviderCredential::Wns(WnsCredential {
                client_id: required(map, kind, "client_id")?,
                client_secret: required(map, kind, "client_secret")?,
            })),
            ProviderKind::Hms => Ok(ProviderCredential::Hms(HmsCredential {
                app_id: required(map, kind, "app_id")?,
                app_secret: required(map, kind, "app_secret")?,
            })),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderCredential::Apns(_) => ProviderKind::Apns,
            ProviderCredential::Gcm(_) => ProviderKind::Gcm,
            ProviderCredential::Fcm(_) => ProviderKind::Fcm,
            ProviderCredential::Wns(_) => ProviderKind::Wns,
            ProviderCredential::Hms(_) => ProviderKind::Hms,
        }
    }

    /// Loggable identity that never contains secret material.
    pub fn identity(&self) -> String {
        match self {
            ProviderCredential::Apns(c) => format!(
                "apns:{}:{}",
                c.bundle_id,
                if c.production { "production" } else { "sandbox" }
            ),
            ProviderCredential::Gcm(c) => format!("gcm:{}", short_digest(&c.api_key)),
            ProviderCredential::Fcm(c) => format!("fcm:{}", c.project_id),
            ProviderCredential::Wns(c) => format!("wns:{}", c.client_id),
            ProviderCredential::Hms(c) => format!("hms:{}", c.app_id),
        }
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderCredential")
            .field(&self.identity())
            .finish()
    }
}

fn short_digest(secret: &str) -> String {
    let digest = hex::encode(Sha256::digest(secret.as_bytes()));
    digest[..12].to_string()
}

fn optional(map: &Map<String, Value>, field: &str) -> Option<String> {
    map.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required(
    map: &Map<String, Value>,
    provider: ProviderKind,
    field: &'static str,
) -> Result<String, CredentialError> {
    optional(map, field).ok_or(CredentialError::MissingField { provider, field })
}

fn apns_from_config(map: &Map<String, Value>) -> Result<ApnsCredential, CredentialError> {
    let kind = ProviderKind::Apns;
    let bundle_id = required(map, kind, "bundle_id")?;
    let production = map
        .get("production")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let has_cert = optional(map, "cert").is_some();
    let has_signing_key = optional(map, "signing_key").is_some();

    let auth = match (has_cert, has_signing_key) {
        (true, true) => {
            return Err(CredentialError::Ambiguous {
                provider: kind,
                reason: "both `cert` and `signing_key` are set".to_string(),
            })
        }
        (false, false) => {
            return Err(CredentialError::Invalid {
                provider: kind,
                reason: "either `cert`/`key` or `signing_key`/`key_id`/`team_id` is required"
                    .to_string(),
            })
        }
        (true, false) => {
            let cert = required(map, kind, "cert")?;
            let key = required(map, kind, "key")?;
            if !cert.contains("BEGIN CERTIFICATE") {
                return Err(CredentialError::Invalid {
                    provider: kind,
                    reason: "`cert` is not a PEM certificate".to_string(),
                });
            }
            if !key.contains("PRIVATE KEY") {
                return Err(CredentialError::Invalid {
                    provider: kind,
                    reason: "`key` is not a PEM private key".to_string(),
                });
            }
            ApnsAuth::Certificate { cert, key }
        }
        (false, true) => {
            let signing_key = required(map, kind, "signing_key")?;
            if !signing_key.contains("PRIVATE KEY") {
                return Err(CredentialError::Invalid {
                    provider: kind,
                    reason: "`signing_key` is not a PEM private key".to_string(),
                });
            }
            ApnsAuth::Token {
                signing_key,
                key_id: required(map, kind, "key_id")?,
                team_id: required(map, kind, "team_id")?,
            }
        }
    };

    Ok(ApnsCredential {
        bundle_id,
        production,
        auth,
    })
}

fn fcm_from_config(map: &Map<String, Value>) -> Result<FcmCredential, CredentialError> {
    let kind = ProviderKind::Fcm;
    let service_account = match map.get("service_account") {
        Some(Value::Object(obj)) => Value::Object(obj.clone()),
        Some(Value::String(raw)) => {
            serde_json::from_str::<Value>(raw).map_err(|e| CredentialError::Invalid {
                provider: kind,
                reason: format!("`service_account` is not valid JSON: {e}"),
            })?
        }
        _ => {
            return Err(CredentialError::MissingField {
                provider: kind,
                field: "service_account",
            })
        }
    };

    let account = service_account
        .as_object()
        .ok_or_else(|| CredentialError::Invalid {
            provider: kind,
            reason: "`service_account` must be an object".to_string(),
        })?;
    let project_id = required(account, kind, "project_id")?;
    let client_email = required(account, kind, "client_email")?;
    required(account, kind, "private_key")?;

    Ok(FcmCredential {
        project_id,
        client_email,
        service_account,
    })
}
