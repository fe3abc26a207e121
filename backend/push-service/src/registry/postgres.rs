use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Registry, RegistryResult};
use crate::config::DatabaseConfig;
use crate::error::RegistryError;
use crate::models::{
    normalize_token, ApnService, Device, FeedbackService, Notification, RegisterDeviceRequest,
};
use apns_binary::Localization;

const DEVICE_COLUMNS: &str = r#"
    d.id, d.token, d.service_id, d.is_active, d.deactivated_at, d.added_at,
    d.last_notified_at, d.platform, d.display, d.os_version,
    COALESCE(array_agg(u.user_id) FILTER (WHERE u.user_id IS NOT NULL), '{}') AS users
"#;

/// Registry backed by PostgreSQL
#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> RegistryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to registry database");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> RegistryResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn port(entity: &'static str, value: i32) -> RegistryResult<u16> {
    u16::try_from(value).map_err(|_| RegistryError::InvalidRecord {
        entity,
        reason: format!("port {value} out of range"),
    })
}

fn device_from_row(row: &PgRow) -> RegistryResult<Device> {
    Ok(Device {
        id: row.try_get("id")?,
        token: row.try_get::<String, _>("token")?.trim_end().to_string(),
        service_id: row.try_get("service_id")?,
        is_active: row.try_get("is_active")?,
        deactivated_at: row.try_get("deactivated_at")?,
        added_at: row.try_get("added_at")?,
        last_notified_at: row.try_get("last_notified_at")?,
        users: row.try_get("users")?,
        platform: row.try_get("platform")?,
        display: row.try_get("display")?,
        os_version: row.try_get("os_version")?,
    })
}

#[async_trait::async_trait]
impl Registry for PgRegistry {
    async fn get_service(&self, id: Uuid) -> RegistryResult<ApnService> {
        let row = sqlx::query(
            r#"
            SELECT id, name, hostname, port, certificate, private_key, passphrase
            FROM apn_services WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RegistryError::NotFound {
            entity: "APNService",
            id,
        })?;

        Ok(ApnService {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            hostname: row.try_get("hostname")?,
            port: port("APNService", row.try_get("port")?)?,
            certificate: row.try_get("certificate")?,
            private_key: row.try_get("private_key")?,
            passphrase: row.try_get("passphrase")?,
        })
    }

    async fn get_feedback_service(&self, id: Uuid) -> RegistryResult<FeedbackService> {
        let row = sqlx::query(
            r#"
            SELECT id, name, hostname, port, apn_service_id
            FROM feedback_services WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RegistryError::NotFound {
            entity: "FeedbackService",
            id,
        })?;

        Ok(FeedbackService {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            hostname: row.try_get("hostname")?,
            port: port("FeedbackService", row.try_get("port")?)?,
            apn_service_id: row.try_get("apn_service_id")?,
        })
    }

    async fn active_devices(&self, service_id: Uuid) -> RegistryResult<Vec<Device>> {
        let sql = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices d
            LEFT JOIN device_users u ON u.device_id = d.id
            WHERE d.service_id = $1 AND d.is_active
            GROUP BY d.id
            ORDER BY d.added_at, d.id
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(service_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(device_from_row).collect()
    }

    async fn devices_by_tokens(
        &self,
        service_id: Uuid,
        tokens: &[String],
    ) -> RegistryResult<Vec<Device>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let tokens: Vec<String> = tokens.iter().map(|t| normalize_token(t)).collect();
        let sql = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices d
            LEFT JOIN device_users u ON u.device_id = d.id
            WHERE d.service_id = $1 AND d.token = ANY($2)
            GROUP BY d.id
            ORDER BY d.added_at, d.id
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(service_id)
            .bind(&tokens)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(device_from_row).collect()
    }

    async fn register_device(&self, mut request: RegisterDeviceRequest) -> RegistryResult<Device> {
        request.token = normalize_token(&request.token);
        let mut tx = self.pool.begin().await?;

        // Re-registering an existing token re-activates it
        let device_id: Uuid = sqlx::query(
            r#"
            INSERT INTO devices (id, token, service_id, is_active, added_at, platform, display, os_version)
            VALUES ($1, $2, $3, TRUE, NOW(), $4, $5, $6)
            ON CONFLICT (token, service_id) DO UPDATE SET
                is_active = TRUE,
                deactivated_at = NULL,
                platform = COALESCE(EXCLUDED.platform, devices.platform),
                display = COALESCE(EXCLUDED.display, devices.display),
                os_version = COALESCE(EXCLUDED.os_version, devices.os_version)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.token)
        .bind(request.service_id)
        .bind(&request.platform)
        .bind(&request.display)
        .bind(&request.os_version)
        .fetch_one(&mut *tx)
        .await?
        .try_get("id")?;

        if !request.users.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO device_users (device_id, user_id)
                SELECT $1, UNNEST($2::uuid[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(device_id)
            .bind(&request.users)
            .execute(&mut *tx)
            .await?;
        }

        let sql = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices d
            LEFT JOIN device_users u ON u.device_id = d.id
            WHERE d.id = $1
            GROUP BY d.id
            "#
        );
        let row = sqlx::query(&sql).bind(device_id).fetch_one(&mut *tx).await?;
        let device = device_from_row(&row)?;

        tx.commit().await?;

        debug!(device_id = %device.id, token = %device.token_prefix(), "Device registered");
        Ok(device)
    }

    async fn update_last_notified(
        &self,
        device_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> RegistryResult<u64> {
        if device_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("UPDATE devices SET last_notified_at = $1 WHERE id = ANY($2)")
            .bind(at)
            .bind(device_ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn deactivate(&self, device_ids: &[Uuid], at: DateTime<Utc>) -> RegistryResult<u64> {
        if device_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE devices SET is_active = FALSE, deactivated_at = $1 WHERE id = ANY($2)",
        )
        .bind(at)
        .bind(device_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn save_notification(&self, notification: &mut Notification) -> RegistryResult<()> {
        let badge = notification
            .badge
            .map(i32::try_from)
            .transpose()
            .map_err(|_| RegistryError::InvalidRecord {
                entity: "Notification",
                reason: "badge out of range".to_string(),
            })?;
        let localization = notification.localization.as_ref();
        let loc_key = localization.map(|l| l.loc_key.clone());
        let loc_args = localization.map(|l| l.loc_args.clone());
        let action_loc_key = localization.and_then(|l| l.action_loc_key.clone());

        let id = *notification.id.get_or_insert_with(Uuid::new_v4);

        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, service_id, message, badge, sound, silent, extra,
                loc_key, loc_args, action_loc_key, created_at, last_sent_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                message = EXCLUDED.message,
                badge = EXCLUDED.badge,
                sound = EXCLUDED.sound,
                silent = EXCLUDED.silent,
                extra = EXCLUDED.extra,
                loc_key = EXCLUDED.loc_key,
                loc_args = EXCLUDED.loc_args,
                action_loc_key = EXCLUDED.action_loc_key,
                last_sent_at = EXCLUDED.last_sent_at
            "#,
        )
        .bind(id)
        .bind(notification.service_id)
        .bind(&notification.message)
        .bind(badge)
        .bind(&notification.sound)
        .bind(notification.silent)
        .bind(&notification.extra)
        .bind(loc_key)
        .bind(loc_args)
        .bind(action_loc_key)
        .bind(notification.created_at)
        .bind(notification.last_sent_at)
        .execute(&self.pool)
        .await?;

        debug!(notification_id = %id, "Notification saved");
        Ok(())
    }
}

impl PgRegistry {
    /// Loads a saved notification, mainly for inspection and tests
    pub async fn get_notification(&self, id: Uuid) -> RegistryResult<Notification> {
        let row = sqlx::query(
            r#"
            SELECT id, service_id, message, badge, sound, silent, extra,
                   loc_key, loc_args, action_loc_key, created_at, last_sent_at
            FROM notifications WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RegistryError::NotFound {
            entity: "Notification",
            id,
        })?;

        let badge: Option<i32> = row.try_get("badge")?;
        let loc_key: Option<String> = row.try_get("loc_key")?;
        let loc_args: Option<Vec<String>> = row.try_get("loc_args")?;
        let action_loc_key: Option<String> = row.try_get("action_loc_key")?;

        let localization = loc_key.map(|key| {
            let localization = Localization::new(key, loc_args.unwrap_or_default());
            match action_loc_key {
                Some(action) => localization.with_action_loc_key(action),
                None => localization,
            }
        });

        Ok(Notification {
            id: row.try_get("id")?,
            service_id: row.try_get("service_id")?,
            message: row.try_get("message")?,
            badge: badge.and_then(|b| u32::try_from(b).ok()),
            sound: row.try_get("sound")?,
            silent: row.try_get("silent")?,
            extra: row.try_get("extra")?,
            localization,
            created_at: row.try_get("created_at")?,
            last_sent_at: row.try_get("last_sent_at")?,
            persist: None,
        })
    }
}
