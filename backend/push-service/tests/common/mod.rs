//! Shared fixtures: a scripted connector and a seeded in-memory registry
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use apns_binary::{Channel, ChannelError, Connector, Credentials, DynChannel, Endpoint};
use chrono::{Duration as ChronoDuration, Utc};
use push_service::{ApnService, Device, MemoryRegistry};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Peer drops the connection mid-write
    Dropped,
    /// Any other write failure
    Broken,
}

#[derive(Default)]
struct Script {
    open_attempts: usize,
    failing_opens: HashSet<usize>,
    send_attempts: usize,
    failing_sends: HashMap<usize, Fault>,
    connections: Vec<Vec<Vec<u8>>>,
    closes: usize,
    feedback: VecDeque<Vec<u8>>,
    read_attempts: usize,
    failing_reads: HashSet<usize>,
}

/// Connector whose channels record frames and fail on cue
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the n-th open attempt (0-based, counted across the whole run)
    pub fn fail_open(self, attempt: usize) -> Self {
        self.script.lock().unwrap().failing_opens.insert(attempt);
        self
    }

    /// Fails the n-th write (0-based, counted across all connections)
    pub fn fail_send(self, attempt: usize, fault: Fault) -> Self {
        self.script.lock().unwrap().failing_sends.insert(attempt, fault);
        self
    }

    /// Fails the n-th read (0-based, counted across all connections)
    pub fn fail_read(self, attempt: usize) -> Self {
        self.script.lock().unwrap().failing_reads.insert(attempt);
        self
    }

    /// Bytes handed out by successive reads, then a clean close
    pub fn with_feedback(self, reads: Vec<Vec<u8>>) -> Self {
        self.script.lock().unwrap().feedback = reads.into();
        self
    }

    pub fn open_attempts(&self) -> usize {
        self.script.lock().unwrap().open_attempts
    }

    pub fn connections(&self) -> Vec<Vec<Vec<u8>>> {
        self.script.lock().unwrap().connections.clone()
    }

    pub fn closes(&self) -> usize {
        self.script.lock().unwrap().closes
    }
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<DynChannel, ChannelError> {
        let mut script = self.script.lock().unwrap();
        let attempt = script.open_attempts;
        script.open_attempts += 1;

        if script.failing_opens.contains(&attempt) {
            return Err(ChannelError::Connection {
                endpoint: endpoint.to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        }

        script.connections.push(Vec::new());
        Ok(Box::new(ScriptedChannel {
            script: self.script.clone(),
            connection: script.connections.len() - 1,
            open: true,
        }))
    }
}

struct ScriptedChannel {
    script: Arc<Mutex<Script>>,
    connection: usize,
    open: bool,
}

#[async_trait::async_trait]
impl Channel for ScriptedChannel {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        if !self.open {
            return Err(ChannelError::Closed);
        }

        let mut script = self.script.lock().unwrap();
        let attempt = script.send_attempts;
        script.send_attempts += 1;

        match script.failing_sends.get(&attempt) {
            Some(Fault::Dropped) => Err(ChannelError::TransientWrite(io::Error::from(
                io::ErrorKind::BrokenPipe,
            ))),
            Some(Fault::Broken) => Err(ChannelError::Write(io::Error::from(
                io::ErrorKind::PermissionDenied,
            ))),
            None => {
                script.connections[self.connection].push(bytes.to_vec());
                Ok(())
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let mut script = self.script.lock().unwrap();
        let attempt = script.read_attempts;
        script.read_attempts += 1;

        if script.failing_reads.contains(&attempt) {
            return Err(ChannelError::Read(io::Error::from(
                io::ErrorKind::ConnectionReset,
            )));
        }

        match script.feedback.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    script.feedback.push_front(chunk[n..].to_vec());
                }
                Ok(n)
            }
            None => Ok(0),
        }
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.script.lock().unwrap().closes += 1;
        }
    }
}

/// Token whose bytes are all `n`
pub fn token(n: u8) -> String {
    hex::encode([n; 32])
}

pub fn service() -> ApnService {
    ApnService::new(
        "sandbox",
        "gateway.sandbox.push.apple.com",
        "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n",
        None,
    )
}

/// Registry holding one service and `count` active devices in a fixed order
pub async fn seeded(count: u8) -> (Arc<MemoryRegistry>, ApnService, Vec<Device>) {
    let registry = Arc::new(MemoryRegistry::new());
    let service = service();
    registry.add_service(service.clone()).await;

    let base = Utc::now() - ChronoDuration::hours(1);
    let mut devices = Vec::new();
    for n in 1..=count {
        let mut device = Device::new(token(n), service.id);
        device.added_at = base + ChronoDuration::seconds(i64::from(n));
        registry.add_device(device.clone()).await;
        devices.push(device);
    }

    (registry, service, devices)
}
