//! Device and notification store
//!
//! Delivery and feedback only talk to the [`Registry`] trait. Every mutation
//! is a bulk, last-writer-wins set of a timestamp or flag, so overlapping
//! deliveries never lose each other's updates and no locking is needed.

mod memory;
mod postgres;

pub use memory::MemoryRegistry;
pub use postgres::PgRegistry;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::models::{ApnService, Device, FeedbackService, Notification, RegisterDeviceRequest};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    async fn get_service(&self, id: Uuid) -> RegistryResult<ApnService>;

    async fn get_feedback_service(&self, id: Uuid) -> RegistryResult<FeedbackService>;

    /// Active devices of a service in registration order
    async fn active_devices(&self, service_id: Uuid) -> RegistryResult<Vec<Device>>;

    /// Devices of a service whose token is in `tokens`, active or not
    async fn devices_by_tokens(
        &self,
        service_id: Uuid,
        tokens: &[String],
    ) -> RegistryResult<Vec<Device>>;

    /// Creates the device, or re-activates it if the (token, service) pair exists
    async fn register_device(&self, request: RegisterDeviceRequest) -> RegistryResult<Device>;

    /// Returns the number of rows touched
    async fn update_last_notified(&self, device_ids: &[Uuid], at: DateTime<Utc>)
        -> RegistryResult<u64>;

    /// Marks devices inactive; returns the number of rows touched
    async fn deactivate(&self, device_ids: &[Uuid], at: DateTime<Utc>) -> RegistryResult<u64>;

    /// Inserts the notification (assigning its id) or updates it
    async fn save_notification(&self, notification: &mut Notification) -> RegistryResult<()>;
}

pub type DynRegistry = Arc<dyn Registry>;
