use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Registry, RegistryResult};
use crate::error::RegistryError;
use crate::models::{
    normalize_token, ApnService, Device, FeedbackService, Notification, RegisterDeviceRequest,
};

#[derive(Default)]
struct Tables {
    services: HashMap<Uuid, ApnService>,
    feedback_services: HashMap<Uuid, FeedbackService>,
    devices: Vec<Device>,
    notifications: HashMap<Uuid, Notification>,
}

/// In-process registry for tests and local runs
#[derive(Default)]
pub struct MemoryRegistry {
    tables: RwLock<Tables>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_service(&self, service: ApnService) {
        self.tables.write().await.services.insert(service.id, service);
    }

    pub async fn add_feedback_service(&self, service: FeedbackService) {
        self.tables
            .write()
            .await
            .feedback_services
            .insert(service.id, service);
    }

    pub async fn add_device(&self, mut device: Device) {
        device.token = normalize_token(&device.token);
        self.tables.write().await.devices.push(device);
    }

    pub async fn device(&self, id: Uuid) -> Option<Device> {
        self.tables
            .read()
            .await
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub async fn notification(&self, id: Uuid) -> Option<Notification> {
        self.tables.read().await.notifications.get(&id).cloned()
    }

    pub async fn notification_count(&self) -> usize {
        self.tables.read().await.notifications.len()
    }
}

fn registration_order(devices: &mut [Device]) {
    devices.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.id.cmp(&b.id)));
}

#[async_trait::async_trait]
impl Registry for MemoryRegistry {
    async fn get_service(&self, id: Uuid) -> RegistryResult<ApnService> {
        self.tables
            .read()
            .await
            .services
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound {
                entity: "APNService",
                id,
            })
    }

    async fn get_feedback_service(&self, id: Uuid) -> RegistryResult<FeedbackService> {
        self.tables
            .read()
            .await
            .feedback_services
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound {
                entity: "FeedbackService",
                id,
            })
    }

    async fn active_devices(&self, service_id: Uuid) -> RegistryResult<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .tables
            .read()
            .await
            .devices
            .iter()
            .filter(|d| d.service_id == service_id && d.is_active)
            .cloned()
            .collect();
        registration_order(&mut devices);
        Ok(devices)
    }

    async fn devices_by_tokens(
        &self,
        service_id: Uuid,
        tokens: &[String],
    ) -> RegistryResult<Vec<Device>> {
        let tokens: Vec<String> = tokens.iter().map(|t| normalize_token(t)).collect();
        let mut devices: Vec<Device> = self
            .tables
            .read()
            .await
            .devices
            .iter()
            .filter(|d| d.service_id == service_id && tokens.contains(&d.token))
            .cloned()
            .collect();
        registration_order(&mut devices);
        Ok(devices)
    }

    async fn register_device(&self, mut request: RegisterDeviceRequest) -> RegistryResult<Device> {
        request.token = normalize_token(&request.token);
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .devices
            .iter_mut()
            .find(|d| d.token == request.token && d.service_id == request.service_id)
        {
            existing.is_active = true;
            existing.deactivated_at = None;
            for user in request.users {
                if !existing.users.contains(&user) {
                    existing.users.push(user);
                }
            }
            existing.platform = request.platform.or(existing.platform.take());
            existing.display = request.display.or(existing.display.take());
            existing.os_version = request.os_version.or(existing.os_version.take());
            return Ok(existing.clone());
        }

        let mut device = Device::new(request.token, request.service_id);
        device.users = request.users;
        device.platform = request.platform;
        device.display = request.display;
        device.os_version = request.os_version;
        tables.devices.push(device.clone());
        Ok(device)
    }

    async fn update_last_notified(
        &self,
        device_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> RegistryResult<u64> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for device in tables.devices.iter_mut().filter(|d| device_ids.contains(&d.id)) {
            device.last_notified_at = Some(at);
            touched += 1;
        }
        Ok(touched)
    }

    async fn deactivate(&self, device_ids: &[Uuid], at: DateTime<Utc>) -> RegistryResult<u64> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for device in tables.devices.iter_mut().filter(|d| device_ids.contains(&d.id)) {
            device.is_active = false;
            device.deactivated_at = Some(at);
            touched += 1;
        }
        Ok(touched)
    }

    async fn save_notification(&self, notification: &mut Notification) -> RegistryResult<()> {
        let id = *notification.id.get_or_insert_with(Uuid::new_v4);
        self.tables
            .write()
            .await
            .notifications
            .insert(id, notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0fd12510cfe6b0a4a89dc7369c96df956f991e66131dab63398734e8000d0029";

    #[tokio::test]
    async fn test_register_reactivates_existing_device() {
        let registry = MemoryRegistry::new();
        let service_id = Uuid::new_v4();

        let first = registry
            .register_device(RegisterDeviceRequest {
                token: TOKEN.to_string(),
                service_id,
                platform: Some("iPhone".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        registry.deactivate(&[first.id], Utc::now()).await.unwrap();
        assert!(registry.active_devices(service_id).await.unwrap().is_empty());

        let again = registry
            .register_device(RegisterDeviceRequest {
                token: TOKEN.to_string(),
                service_id,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(again.id, first.id);
        assert!(again.is_active);
        assert!(again.deactivated_at.is_none());
        assert_eq!(again.platform.as_deref(), Some("iPhone"));
        assert_eq!(registry.active_devices(service_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_uppercase_token_matches_feedback_form() {
        let registry = MemoryRegistry::new();
        let service_id = Uuid::new_v4();

        let mut device = Device::new(TOKEN, service_id);
        device.token = TOKEN.to_uppercase();
        registry.add_device(device.clone()).await;

        let found = registry
            .devices_by_tokens(service_id, &[TOKEN.to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, device.id);
        assert_eq!(found[0].token, TOKEN);

        let again = registry
            .register_device(RegisterDeviceRequest {
                token: TOKEN.to_uppercase(),
                service_id,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(again.id, device.id);
    }

    #[tokio::test]
    async fn test_save_notification_assigns_id_once() {
        let registry = MemoryRegistry::new();
        let mut notification = Notification::new(Uuid::new_v4()).with_message("hi");

        registry.save_notification(&mut notification).await.unwrap();
        let id = notification.id.unwrap();

        notification.last_sent_at = Some(Utc::now());
        registry.save_notification(&mut notification).await.unwrap();

        assert_eq!(notification.id, Some(id));
        assert_eq!(registry.notification_count().await, 1);
        assert!(registry.notification(id).await.unwrap().last_sent_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let registry = MemoryRegistry::new();
        let err = registry.get_service(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { entity: "APNService", .. }));
    }
}
