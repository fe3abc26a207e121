//! Feedback decoder
//!
//! The feedback endpoint streams fixed-size records for tokens that should no
//! longer be pushed to, then closes the connection. Matching devices are
//! deactivated.

use std::sync::Arc;

use apns_binary::feedback::read_records;
use apns_binary::Connector;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::error::FeedbackError;
use crate::models::FeedbackService;
use crate::registry::DynRegistry;

#[derive(Clone)]
pub struct FeedbackDecoder {
    registry: DynRegistry,
    connector: Arc<dyn Connector>,
    config: DeliveryConfig,
}

impl FeedbackDecoder {
    pub fn new(registry: DynRegistry, connector: Arc<dyn Connector>, config: DeliveryConfig) -> Self {
        Self {
            registry,
            connector,
            config,
        }
    }

    /// Reads the feedback stream and deactivates the reported devices.
    /// Returns how many devices were deactivated.
    pub async fn call(&self, feedback: &FeedbackService) -> Result<u64, FeedbackError> {
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, self.call_inner(feedback))
            .await
            .map_err(|_| FeedbackError::Timeout(timeout))?
    }

    async fn call_inner(&self, feedback: &FeedbackService) -> Result<u64, FeedbackError> {
        let called_at = Utc::now();
        let service = self.registry.get_service(feedback.apn_service_id).await?;
        let endpoint = feedback.endpoint();

        let mut channel = self
            .connector
            .open(&endpoint, &service.credentials())
            .await?;
        let records = read_records(channel.as_mut()).await;
        channel.close().await;
        let records = records?;

        if records.is_empty() {
            info!(feedback_service = %feedback.name, "No feedback records");
            return Ok(0);
        }

        let mut tokens: Vec<String> = records.into_iter().map(|r| r.token).collect();
        tokens.sort();
        tokens.dedup();
        let devices = self.registry.devices_by_tokens(service.id, &tokens).await?;
        if devices.len() < tokens.len() {
            warn!(
                reported = tokens.len(),
                known = devices.len(),
                "Feedback reported tokens with no registered device"
            );
        }

        let ids: Vec<Uuid> = devices.iter().map(|d| d.id).collect();
        let deactivated = self.registry.deactivate(&ids, called_at).await?;

        info!(
            feedback_service = %feedback.name,
            endpoint = %endpoint,
            deactivated,
            "Processed feedback"
        );

        Ok(deactivated)
    }
}
