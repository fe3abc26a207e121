use std::sync::Arc;

use apns_binary::frame::decode_token;
use apns_binary::{Connector, SecureConnector};
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, DeliveryConfig};
use crate::delivery::{DeliveryEngine, DeliveryOutcome};
use crate::error::{DeliveryError, FeedbackError, Result};
use crate::feedback::FeedbackDecoder;
use crate::models::{normalize_token, Device, Notification, RegisterDeviceRequest};
use crate::registry::{DynRegistry, PgRegistry};

/// Entry point used by the binaries and by anything embedding the service
#[derive(Clone)]
pub struct PushService {
    registry: DynRegistry,
    engine: DeliveryEngine,
    feedback: FeedbackDecoder,
}

impl PushService {
    pub fn new(registry: DynRegistry, connector: Arc<dyn Connector>, config: DeliveryConfig) -> Self {
        Self {
            engine: DeliveryEngine::new(registry.clone(), connector.clone(), config.clone()),
            feedback: FeedbackDecoder::new(registry.clone(), connector, config),
            registry,
        }
    }

    /// Connects to the database, applies migrations and uses TLS channels
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = PgRegistry::connect(&config.database).await?;
        registry.migrate().await?;

        let connector = SecureConnector::new(config.delivery.channel_config()?);

        Ok(Self::new(
            Arc::new(registry),
            Arc::new(connector),
            config.delivery.clone(),
        ))
    }

    pub fn registry(&self) -> &DynRegistry {
        &self.registry
    }

    /// Pushes to every active device of the notification's service
    pub async fn push_notification(
        &self,
        notification: &mut Notification,
        chunk_size: Option<usize>,
    ) -> Result<DeliveryOutcome> {
        let chunk_size = chunk_size.unwrap_or(self.engine.config().chunk_size);
        self.engine.deliver(notification, None, chunk_size).await
    }

    /// Pushes to the given devices only
    pub async fn push_to_devices(
        &self,
        notification: &mut Notification,
        devices: Vec<Device>,
        chunk_size: Option<usize>,
    ) -> Result<DeliveryOutcome> {
        if let Some(device) = devices
            .iter()
            .find(|d| d.service_id != notification.service_id)
        {
            return Err(DeliveryError::InvalidArgument(format!(
                "device {} belongs to service {}, not {}",
                device.id, device.service_id, notification.service_id
            )));
        }

        let chunk_size = chunk_size.unwrap_or(self.engine.config().chunk_size);
        self.engine
            .deliver(notification, Some(devices), chunk_size)
            .await
    }

    pub async fn push_to_device(
        &self,
        device: &Device,
        notification: &mut Notification,
    ) -> Result<DeliveryOutcome> {
        self.push_to_devices(notification, vec![device.clone()], Some(1))
            .await
    }

    pub async fn call_feedback(&self, feedback_service_id: Uuid) -> Result<u64, FeedbackError> {
        let feedback = self
            .registry
            .get_feedback_service(feedback_service_id)
            .await?;
        self.feedback.call(&feedback).await
    }

    /// Registers a device token, re-activating it if already known
    pub async fn register_device(&self, mut request: RegisterDeviceRequest) -> Result<Device> {
        request.token = normalize_token(&request.token);
        decode_token(&request.token)?;
        self.registry.get_service(request.service_id).await?;

        let device = self.registry.register_device(request).await?;
        info!(
            device_id = %device.id,
            token = %device.token_prefix(),
            service_id = %device.service_id,
            "Device registered"
        );
        Ok(device)
    }
}
