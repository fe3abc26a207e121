//! Delivery engine
//!
//! Pushes one notification to a list of devices over the binary gateway
//! protocol. Devices are split into chunks and each chunk gets its own
//! connection. The gateway signals a rejected frame by dropping the
//! connection, so a write that fails with a broken pipe skips the device
//! being written, reconnects and carries on with the next one.

use std::sync::Arc;

use apns_binary::frame::pack;
use apns_binary::{ChannelError, Connector, Credentials, DynChannel, Endpoint};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, Result};
use crate::models::{Device, Notification};
use crate::registry::DynRegistry;

/// What happened during a deliver call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    /// Chunks that had at least one active device
    pub chunks: usize,
    /// Connections opened, reconnects included
    pub connections: usize,
    /// Frames written and marked notified
    pub sent: usize,
    /// Devices dropped after a transient write failure
    pub skipped: usize,
    /// Devices left unsent because a reconnect failed
    pub abandoned: usize,
    /// Inactive devices in the input, never sent to
    pub inactive: usize,
}

/// A device with its frame already packed
struct Prepared {
    device_id: Uuid,
    token_prefix: String,
    frame: Vec<u8>,
}

/// What to do once the open segment has been closed and marked
enum AfterClose {
    Finish,
    Resume(usize),
    Fail(ChannelError),
}

enum ChunkState {
    Connecting {
        position: usize,
        resuming: bool,
    },
    Sending {
        channel: DynChannel,
        segment_start: usize,
        position: usize,
    },
    Closing {
        channel: DynChannel,
        segment_start: usize,
        segment_end: usize,
        then: AfterClose,
    },
    Failed(ChannelError),
    Done,
}

#[derive(Clone)]
pub struct DeliveryEngine {
    registry: DynRegistry,
    connector: Arc<dyn Connector>,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    pub fn new(registry: DynRegistry, connector: Arc<dyn Connector>, config: DeliveryConfig) -> Self {
        Self {
            registry,
            connector,
            config,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Sends `notification` to `devices`, or to every active device of its
    /// service when `devices` is None.
    ///
    /// Payload and token problems are reported before any connection is
    /// opened. Failing to open the first connection of a chunk, or a
    /// non-transient write error, aborts the call; devices written before
    /// that point stay marked as notified.
    pub async fn deliver(
        &self,
        notification: &mut Notification,
        devices: Option<Vec<Device>>,
        chunk_size: usize,
    ) -> Result<DeliveryOutcome> {
        if chunk_size == 0 {
            return Err(DeliveryError::InvalidArgument(
                "chunk size must be at least 1".to_string(),
            ));
        }

        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, self.deliver_inner(notification, devices, chunk_size))
            .await
            .map_err(|_| DeliveryError::Timeout(timeout))?
    }

    async fn deliver_inner(
        &self,
        notification: &mut Notification,
        devices: Option<Vec<Device>>,
        chunk_size: usize,
    ) -> Result<DeliveryOutcome> {
        let service = self.registry.get_service(notification.service_id).await?;
        let devices = match devices {
            Some(devices) => devices,
            None => self.registry.active_devices(service.id).await?,
        };

        let mut outcome = DeliveryOutcome {
            inactive: devices.iter().filter(|d| !d.is_active).count(),
            ..Default::default()
        };

        let payload = notification.payload().encode()?;
        let chunks = devices
            .chunks(chunk_size)
            .map(|chunk| {
                chunk
                    .iter()
                    .filter(|device| device.is_active)
                    .map(|device| -> Result<Prepared> {
                        Ok(Prepared {
                            device_id: device.id,
                            token_prefix: device.token_prefix(),
                            frame: pack(&payload, &device.token)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let endpoint = service.endpoint();
        let credentials = service.credentials();

        info!(
            service_id = %service.id,
            endpoint = %endpoint,
            devices = devices.len(),
            chunk_size,
            payload_bytes = payload.len(),
            "Delivering notification"
        );

        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.is_empty() {
                debug!(chunk = index, "Chunk has no active devices, skipping");
                continue;
            }
            outcome.chunks += 1;
            self.deliver_chunk(&endpoint, &credentials, chunk, &mut outcome)
                .await?;
        }

        if notification.should_persist(self.config.persist_notifications) {
            notification.last_sent_at = Some(Utc::now());
            self.registry.save_notification(notification).await?;
        }

        info!(
            service_id = %service.id,
            sent = outcome.sent,
            skipped = outcome.skipped,
            abandoned = outcome.abandoned,
            connections = outcome.connections,
            "Notification delivered"
        );

        Ok(outcome)
    }

    async fn deliver_chunk(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        chunk: &[Prepared],
        outcome: &mut DeliveryOutcome,
    ) -> Result<()> {
        let mut state = ChunkState::Connecting {
            position: 0,
            resuming: false,
        };

        loop {
            state = match state {
                ChunkState::Connecting { position, resuming } => {
                    match self.connector.open(endpoint, credentials).await {
                        Ok(channel) => {
                            outcome.connections += 1;
                            ChunkState::Sending {
                                channel,
                                segment_start: position,
                                position,
                            }
                        }
                        Err(e) if resuming => {
                            let abandoned = chunk.len() - position;
                            warn!(
                                endpoint = %endpoint,
                                abandoned,
                                error = %e,
                                "Reconnect failed, abandoning rest of chunk"
                            );
                            outcome.abandoned += abandoned;
                            ChunkState::Done
                        }
                        Err(e) => ChunkState::Failed(e),
                    }
                }

                ChunkState::Sending {
                    mut channel,
                    segment_start,
                    position,
                } => {
                    let device = match chunk.get(position) {
                        Some(device) => device,
                        None => {
                            state = ChunkState::Closing {
                                channel,
                                segment_start,
                                segment_end: position,
                                then: AfterClose::Finish,
                            };
                            continue;
                        }
                    };

                    match channel.send(&device.frame).await {
                        Ok(()) => ChunkState::Sending {
                            channel,
                            segment_start,
                            position: position + 1,
                        },
                        Err(e) if e.is_transient() => {
                            warn!(
                                token = %device.token_prefix,
                                error = %e,
                                "Gateway dropped the connection, skipping device"
                            );
                            outcome.skipped += 1;
                            ChunkState::Closing {
                                channel,
                                segment_start,
                                segment_end: position,
                                then: AfterClose::Resume(position + 1),
                            }
                        }
                        Err(e) => {
                            warn!(token = %device.token_prefix, error = %e, "Write to gateway failed");
                            ChunkState::Closing {
                                channel,
                                segment_start,
                                segment_end: position,
                                then: AfterClose::Fail(e),
                            }
                        }
                    }
                }

                ChunkState::Closing {
                    mut channel,
                    segment_start,
                    segment_end,
                    then,
                } => {
                    channel.close().await;
                    self.mark_notified(&chunk[segment_start..segment_end]).await?;
                    outcome.sent += segment_end - segment_start;

                    match then {
                        AfterClose::Resume(next) if next < chunk.len() => ChunkState::Connecting {
                            position: next,
                            resuming: true,
                        },
                        AfterClose::Resume(_) | AfterClose::Finish => ChunkState::Done,
                        AfterClose::Fail(e) => ChunkState::Failed(e),
                    }
                }

                ChunkState::Failed(e) => return Err(e.into()),

                ChunkState::Done => return Ok(()),
            };
        }
    }

    async fn mark_notified(&self, sent: &[Prepared]) -> Result<()> {
        if sent.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = sent.iter().map(|p| p.device_id).collect();
        let updated = self.registry.update_last_notified(&ids, Utc::now()).await?;
        debug!(devices = ids.len(), updated, "Marked devices notified");
        Ok(())
    }
}
