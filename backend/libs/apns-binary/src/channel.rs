use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::config::{ChannelConfig, Endpoint};
use crate::credentials::Credentials;
use crate::error::{ChannelError, ChannelResult};

/// An open, authenticated connection to a push gateway or feedback service
#[async_trait::async_trait]
pub trait Channel: Send {
    /// Writes the whole buffer and flushes it to the socket
    ///
    /// # Returns
    /// `Err(ChannelError::TransientWrite)` when the peer has dropped the
    /// connection, any other error is fatal
    async fn send(&mut self, bytes: &[u8]) -> ChannelResult<()>;

    /// Reads up to `buf.len()` bytes; `Ok(0)` means the peer closed the channel
    async fn receive(&mut self, buf: &mut [u8]) -> ChannelResult<usize>;

    /// Shuts the connection down. Safe to call more than once.
    async fn close(&mut self);
}

pub type DynChannel = Box<dyn Channel>;

/// Opens channels. The delivery engine and the feedback reader only see this trait.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint, credentials: &Credentials)
        -> ChannelResult<DynChannel>;
}

pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// TCP + TLS connector authenticating with the service's client certificate
///
/// Client configs are built once per set of credentials and shared by clones,
/// so every chunk and reconnect of a delivery reuses the decrypted key and
/// the loaded roots.
#[derive(Debug, Clone, Default)]
pub struct SecureConnector {
    config: ChannelConfig,
    client_configs: Arc<Mutex<HashMap<Credentials, Arc<ClientConfig>>>>,
}

impl SecureConnector {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            client_configs: Arc::default(),
        }
    }

    fn root_store(&self) -> ChannelResult<RootCertStore> {
        let mut roots = RootCertStore::empty();

        match &self.config.trust_anchor_pem {
            Some(pem) => {
                for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
                    let cert = cert
                        .map_err(|e| ChannelError::InvalidCredentials(format!("trust anchor: {e}")))?;
                    roots
                        .add(cert)
                        .map_err(|e| ChannelError::InvalidCredentials(format!("trust anchor: {e}")))?;
                }
            }
            None => {
                let native = rustls_native_certs::load_native_certs().map_err(|e| {
                    ChannelError::InvalidCredentials(format!("failed to load platform roots: {e}"))
                })?;
                let (added, ignored) = roots.add_parsable_certificates(native);
                debug!(added, ignored, "Loaded platform trust roots");
            }
        }

        Ok(roots)
    }

    fn client_config(&self, credentials: &Credentials) -> ChannelResult<Arc<ClientConfig>> {
        let cached = self
            .client_configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(credentials)
            .cloned();
        if let Some(config) = cached {
            return Ok(config);
        }

        let config = self.build_client_config(credentials)?;
        self.client_configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credentials.clone(), config.clone());
        debug!("Built TLS client config");
        Ok(config)
    }

    fn build_client_config(&self, credentials: &Credentials) -> ChannelResult<Arc<ClientConfig>> {
        let identity = credentials.load()?;
        let roots = self.root_store()?;

        let config = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| ChannelError::InvalidCredentials(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(identity.cert_chain, identity.key)
            .map_err(|e| ChannelError::InvalidCredentials(e.to_string()))?;

        Ok(Arc::new(config))
    }

    /// Connects and completes the TLS handshake
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> ChannelResult<SecureChannel> {
        let client_config = self.client_config(credentials)?;
        let timeout = self.config.connect_timeout;

        let tcp = tokio::time::timeout(
            timeout,
            TcpStream::connect((endpoint.hostname.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| ChannelError::Connection {
            endpoint: endpoint.to_string(),
            source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|e| ChannelError::Connection {
            endpoint: endpoint.to_string(),
            source: e,
        })?;

        let server_name = ServerName::try_from(endpoint.hostname.clone()).map_err(|e| {
            ChannelError::Handshake {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        })?;

        let stream = tokio::time::timeout(
            timeout,
            TlsConnector::from(client_config).connect(server_name, tcp),
        )
        .await
        .map_err(|_| ChannelError::Handshake {
            endpoint: endpoint.to_string(),
            reason: "handshake timed out".to_string(),
        })?
        .map_err(|e| ChannelError::Handshake {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        info!(endpoint = %endpoint, "Opened secure channel");

        Ok(SecureChannel {
            endpoint: endpoint.clone(),
            stream: Some(stream),
        })
    }
}

#[async_trait::async_trait]
impl Connector for SecureConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> ChannelResult<DynChannel> {
        let channel = self.connect(endpoint, credentials).await?;
        Ok(Box::new(channel))
    }
}

/// TLS client stream owned by exactly one open call
pub struct SecureChannel {
    endpoint: Endpoint,
    stream: Option<TlsStream<TcpStream>>,
}

impl SecureChannel {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Broken pipe and resets mean the gateway hung up on us, usually after a
/// frame it rejected.
fn classify_write_error(err: io::Error) -> ChannelError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::WouldBlock => ChannelError::TransientWrite(err),
        _ => ChannelError::Write(err),
    }
}

#[async_trait::async_trait]
impl Channel for SecureChannel {
    async fn send(&mut self, bytes: &[u8]) -> ChannelResult<()> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;

        stream.write_all(bytes).await.map_err(classify_write_error)?;
        stream.flush().await.map_err(classify_write_error)
    }

    async fn receive(&mut self, buf: &mut [u8]) -> ChannelResult<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };

        match stream.read(buf).await {
            Ok(n) => Ok(n),
            // Apple's feedback service hangs up without a close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(endpoint = %self.endpoint, "Peer closed without close_notify");
                Ok(0)
            }
            Err(e) => Err(ChannelError::Read(e)),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!(endpoint = %self.endpoint, "Error shutting down channel: {}", e);
            }
            debug!(endpoint = %self.endpoint, "Closed secure channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::certs::generate_dev_identity;

    #[test]
    fn test_client_config_reused_per_credentials() {
        let identity = generate_dev_identity().unwrap();
        let other = generate_dev_identity().unwrap();
        let connector =
            SecureConnector::new(ChannelConfig::default().with_trust_anchor(identity.ca_cert.clone()));
        let creds = Credentials::new(identity.client_cert.clone(), Some(identity.client_key.clone()));

        let first = connector.client_config(&creds).unwrap();
        let again = connector.clone().client_config(&creds).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let other_creds = Credentials::new(other.client_cert, Some(other.client_key));
        let different = connector.client_config(&other_creds).unwrap();
        assert!(!Arc::ptr_eq(&first, &different));
    }

    #[test]
    fn test_failed_config_not_cached() {
        let identity = generate_dev_identity().unwrap();
        let connector = SecureConnector::new(ChannelConfig::default());
        let creds = Credentials::new(identity.client_cert, Some("garbage".to_string()));

        assert!(connector.client_config(&creds).is_err());
        assert!(connector.client_configs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_broken_pipe_is_transient() {
        let err = classify_write_error(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(err.is_transient());

        let err = classify_write_error(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(err.is_transient());
    }

    #[test]
    fn test_other_write_errors_are_fatal() {
        let err = classify_write_error(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_transient());
        assert!(matches!(err, ChannelError::Write(_)));
    }

    #[tokio::test]
    async fn test_closed_channel_is_inert() {
        let mut channel = SecureChannel {
            endpoint: Endpoint::new("localhost", 2195),
            stream: None,
        };

        channel.close().await;
        channel.close().await;
        assert!(!channel.is_open());

        let mut buf = [0u8; 8];
        assert_eq!(channel.receive(&mut buf).await.unwrap(), 0);
        assert!(matches!(channel.send(b"x").await, Err(ChannelError::Closed)));
    }
}
