/// Nova APNs Binary Interface Library
///
/// Client side of Apple's binary push interface and its feedback service,
/// used by the push-service to reach iOS devices.
///
/// It handles:
/// - Certificate / private key loading, including passphrase protected keys
/// - TLS connections authenticated with the service's client certificate
/// - Payload encoding with the 256 byte limit
/// - Binary frame packing and unpacking
/// - Feedback record decoding
pub mod channel;
pub mod config;
pub mod credentials;
pub mod dev;
pub mod error;
pub mod feedback;
pub mod frame;
pub mod payload;

pub use channel::{Channel, Connector, DynChannel, SecureChannel, SecureConnector};
pub use config::{ChannelConfig, Endpoint};
pub use credentials::Credentials;
pub use error::{ChannelError, CredentialsError, FrameError, PayloadError};
pub use feedback::FeedbackRecord;
pub use payload::{Localization, Payload, MAX_PAYLOAD_SIZE};
