use std::fmt;
use std::time::Duration;

pub const PRODUCTION_GATEWAY: &str = "gateway.push.apple.com";
pub const SANDBOX_GATEWAY: &str = "gateway.sandbox.push.apple.com";
pub const PRODUCTION_FEEDBACK: &str = "feedback.push.apple.com";
pub const SANDBOX_FEEDBACK: &str = "feedback.sandbox.push.apple.com";

pub const GATEWAY_PORT: u16 = 2195;
pub const FEEDBACK_PORT: u16 = 2196;

/// Host and port of a push gateway or feedback service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub hostname: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Push gateway for the given environment
    pub fn gateway(is_production: bool) -> Self {
        if is_production {
            Self::new(PRODUCTION_GATEWAY, GATEWAY_PORT)
        } else {
            Self::new(SANDBOX_GATEWAY, GATEWAY_PORT)
        }
    }

    /// Feedback service for the given environment
    pub fn feedback(is_production: bool) -> Self {
        if is_production {
            Self::new(PRODUCTION_FEEDBACK, FEEDBACK_PORT)
        } else {
            Self::new(SANDBOX_FEEDBACK, FEEDBACK_PORT)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Connection settings shared by every channel a connector opens
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bound on TCP connect plus TLS handshake
    pub connect_timeout: Duration,
    /// PEM trust anchor used instead of the platform roots (sandbox / test servers)
    pub trust_anchor_pem: Option<String>,
}

impl ChannelConfig {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            trust_anchor_pem: None,
        }
    }

    /// Trust only the given CA instead of the platform roots
    pub fn with_trust_anchor(mut self, pem: String) -> Self {
        self.trust_anchor_pem = Some(pem);
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
