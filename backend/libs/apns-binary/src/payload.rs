//! JSON payload encoding
//!
//! The payload is a JSON object with the reserved `aps` dictionary plus any
//! caller supplied top level keys. The binary interface rejects anything over
//! 256 bytes, so the limit is checked here before a connection is opened.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PayloadError, PayloadResult};

pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Top level key owned by the provider
pub const RESERVED_KEY: &str = "aps";

/// Localized alert: the client looks `loc_key` up in its string table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localization {
    pub loc_key: String,
    pub loc_args: Vec<String>,
    pub action_loc_key: Option<String>,
}

impl Localization {
    pub fn new<I, A>(loc_key: impl Into<String>, loc_args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        Self {
            loc_key: loc_key.into(),
            loc_args: loc_args.into_iter().map(|a| a.to_string()).collect(),
            action_loc_key: None,
        }
    }

    pub fn with_action_loc_key(mut self, key: impl Into<String>) -> Self {
        self.action_loc_key = Some(key.into());
        self
    }
}

/// Everything that ends up in the encoded payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub alert: Option<String>,
    pub badge: Option<u32>,
    pub sound: Option<String>,
    pub silent: bool,
    pub localization: Option<Localization>,
    pub extra: Option<Value>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Alert<'a> {
    Plain(&'a str),
    Localized {
        #[serde(rename = "loc-key")]
        loc_key: &'a str,
        #[serde(rename = "loc-args")]
        loc_args: &'a [String],
        #[serde(rename = "action-loc-key", skip_serializing_if = "Option::is_none")]
        action_loc_key: Option<&'a str>,
    },
}

#[derive(Serialize)]
struct Aps<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<Alert<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    content_available: Option<u8>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alert(mut self, alert: impl Into<String>) -> Self {
        self.alert = Some(alert.into());
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

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn with_localization(mut self, localization: Localization) -> Self {
        self.localization = Some(localization);
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    fn aps(&self) -> Aps<'_> {
        let alert = match (&self.localization, &self.alert) {
            (Some(loc), _) => Some(Alert::Localized {
                loc_key: &loc.loc_key,
                loc_args: &loc.loc_args,
                action_loc_key: loc.action_loc_key.as_deref(),
            }),
            (None, Some(message)) => Some(Alert::Plain(message)),
            (None, None) => None,
        };

        Aps {
            alert,
            badge: self.badge,
            sound: self.sound.as_deref().filter(|s| !s.is_empty()),
            content_available: self.silent.then_some(1),
        }
    }

    /// Builds the JSON document: `aps` merged with the extra keys
    pub fn to_value(&self) -> PayloadResult<Value> {
        let mut document = match &self.extra {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(extra)) => {
                if extra.contains_key(RESERVED_KEY) {
                    return Err(PayloadError::ReservedKey(RESERVED_KEY.to_string()));
                }
                extra.clone()
            }
            Some(_) => return Err(PayloadError::InvalidExtra),
        };

        document.insert(RESERVED_KEY.to_string(), serde_json::to_value(self.aps())?);
        Ok(Value::Object(document))
    }

    /// Compact UTF-8 JSON, at most [`MAX_PAYLOAD_SIZE`] bytes
    pub fn encode(&self) -> PayloadResult<Vec<u8>> {
        let bytes = serde_json::to_vec(&self.to_value()?)?;

        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(PayloadError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(bytes)
    }

    /// Pre-send check: false when the payload cannot be encoded within the limit
    pub fn is_valid_length(&self) -> bool {
        self.encode().is_ok()
    }
}

pub fn encode(payload: &Payload) -> PayloadResult<Vec<u8>> {
    payload.encode()
}
