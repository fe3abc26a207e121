use std::time::Duration;

use apns_binary::{ChannelError, FrameError, PayloadError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} with id {id} does not exist")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Invalid {entity} record: {reason}")]
    InvalidRecord { entity: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Delivery did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Feedback call did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required environment variable '{0}' not set")]
    Missing(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}

pub type Result<T, E = DeliveryError> = std::result::Result<T, E>;
