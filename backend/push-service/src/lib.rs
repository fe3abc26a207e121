//! Push notification delivery over the binary gateway protocol
//!
//! Devices and notifications live in a [`registry::Registry`]; the
//! [`delivery::DeliveryEngine`] sends a notification to them in chunks and
//! the [`feedback::FeedbackDecoder`] deactivates tokens the provider reports
//! as gone. [`PushService`] ties these together for the binaries.

pub mod config;
pub mod delivery;
pub mod error;
pub mod feedback;
pub mod models;
pub mod registry;
pub mod service;

pub use config::{AuthMode, Config, DeliveryConfig};
pub use delivery::{DeliveryEngine, DeliveryOutcome};
pub use error::{ConfigError, DeliveryError, FeedbackError, RegistryError, Result};
pub use feedback::FeedbackDecoder;
pub use models::{ApnService, Device, FeedbackService, Notification, RegisterDeviceRequest};
pub use registry::{DynRegistry, MemoryRegistry, PgRegistry, Registry};
pub use service::PushService;
