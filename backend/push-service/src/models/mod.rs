use apns_binary::config::{FEEDBACK_PORT, GATEWAY_PORT};
use apns_binary::{Credentials, CredentialsError, Endpoint, Localization, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A push gateway (live or sandbox) and the certificate used to reach it
#[derive(Clone, Serialize, Deserialize)]
pub struct ApnService {
    pub id: Uuid,

    /// Display name
    pub name: String,

    pub hostname: String,

    pub port: u16,

    /// Client certificate (PEM). May also carry the private key block.
    pub certificate: String,

    /// Private key (PEM), optionally encrypted
    #[serde(skip_serializing)]
    pub private_key: Option<String>,

    #[serde(skip_serializing)]
    pub passphrase: Option<String>,
}

impl ApnService {
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        certificate: impl Into<String>,
        private_key: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            hostname: hostname.into(),
            port: GATEWAY_PORT,
            certificate: certificate.into(),
            private_key,
            passphrase: None,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.hostname.clone(), self.port)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.certificate.clone(), self.private_key.clone())
            .with_passphrase(self.passphrase.clone())
    }

    /// PEM markers present and, if a passphrase is set, it decrypts the key
    pub fn validate(&self) -> Result<(), CredentialsError> {
        self.credentials().validate()
    }
}

impl std::fmt::Debug for ApnService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApnService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Feedback endpoint paired with the push service whose certificate it reuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackService {
    pub id: Uuid,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub apn_service_id: Uuid,
}

impl FeedbackService {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, apn_service_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            hostname: hostname.into(),
            port: FEEDBACK_PORT,
            apn_service_id,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.hostname.clone(), self.port)
    }
}

/// Canonical form of a device token: trimmed lowercase hex, matching what
/// the feedback service reports
pub fn normalize_token(token: &str) -> String {
    token.trim().to_ascii_lowercase()
}

/// A registered device token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,

    /// 64 hex characters
    pub token: String,

    pub service_id: Uuid,

    pub is_active: bool,

    /// Set when the feedback service reports the device gone
    pub deactivated_at: Option<DateTime<Utc>>,

    pub added_at: DateTime<Utc>,

    pub last_notified_at: Option<DateTime<Utc>>,

    /// Users associated with this device
    pub users: Vec<Uuid>,

    pub platform: Option<String>,
    pub display: Option<String>,
    pub os_version: Option<String>,
}

impl Device {
    pub fn new(token: impl AsRef<str>, service_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: normalize_token(token.as_ref()),
            service_id,
            is_active: true,
            deactivated_at: None,
            added_at: Utc::now(),
            last_notified_at: None,
            users: Vec::new(),
            platform: None,
            display: None,
            os_version: None,
        }
    }

    pub fn token_prefix(&self) -> String {
        self.token.chars().take(8).collect()
    }
}

/// Registration request; an existing (token, service) pair is re-activated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    pub token: String,
    pub service_id: Uuid,
    #[serde(default)]
    pub users: Vec<Uuid>,
    pub platform: Option<String>,
    pub display: Option<String>,
    pub os_version: Option<String>,
}

/// Content to push to the devices of one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// None until the notification has been saved
    pub id: Option<Uuid>,

    pub service_id: Uuid,

    pub message: Option<String>,

    pub badge: Option<u32>,

    pub sound: Option<String>,

    /// Sends `content-available` for a background refresh
    #[serde(default)]
    pub silent: bool,

    /// Custom top level payload keys
    pub extra: Option<serde_json::Value>,

    pub localization: Option<Localization>,

    pub created_at: DateTime<Utc>,

    pub last_sent_at: Option<DateTime<Utc>>,

    /// Whether to save after sending; None falls back to configuration
    #[serde(skip)]
    pub persist: Option<bool>,
}

impl Notification {
    pub fn new(service_id: Uuid) -> Self {
        Self {
            id: None,
            service_id,
            message: None,
            badge: None,
            sound: None,
            silent: false,
            extra: None,
            localization: None,
            created_at: Utc::now(),
            last_sent_at: None,
            persist: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn with_localization(mut self, localization: Localization) -> Self {
        self.localization = Some(localization);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn payload(&self) -> Payload {
        Payload {
            alert: self.message.clone(),
            badge: self.badge,
            sound: self.sound.clone(),
            silent: self.silent,
            localization: self.localization.clone(),
            extra: self.extra.clone(),
        }
    }

    /// True when the encoded payload fits in 256 bytes
    pub fn is_valid_length(&self) -> bool {
        self.payload().is_valid_length()
    }

    /// Saved notifications are always written back; new ones only when asked
    pub fn should_persist(&self, persist_by_default: bool) -> bool {
        self.id.is_some() || self.persist.unwrap_or(persist_by_default)
    }
}
