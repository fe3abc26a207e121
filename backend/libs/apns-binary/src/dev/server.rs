//! Loopback TLS server that stands in for a push gateway or feedback service

use std::io;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use super::certs::DevIdentity;
use crate::channel::crypto_provider;
use crate::config::Endpoint;

/// What the server does with each accepted connection
#[derive(Debug, Clone)]
pub enum ServerScript {
    /// Read the connection to EOF and report everything received
    Record,
    /// Write these bytes, then close the connection
    Reply(Vec<u8>),
}

/// Accepts TLS connections on 127.0.0.1, requiring a client certificate
/// signed by the development CA.
pub struct LoopbackServer {
    endpoint: Endpoint,
    received: mpsc::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl LoopbackServer {
    pub async fn start(identity: &DevIdentity, script: ServerScript) -> Result<Self> {
        let acceptor = TlsAcceptor::from(Arc::new(server_config(identity)?));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (tx, received) = mpsc::unbounded_channel();
        let script = Arc::new(script);

        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Loopback server accept failed: {}", e);
                        break;
                    }
                };

                let acceptor = acceptor.clone();
                let script = script.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(acceptor, stream, &script, tx).await {
                        debug!(%peer, "Loopback connection ended with error: {}", e);
                    }
                });
            }
        });

        Ok(Self {
            endpoint: Endpoint::new("127.0.0.1", port),
            received,
            task,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Bytes received on the next finished connection (`ServerScript::Record`)
    pub async fn next_connection(&mut self) -> Option<Vec<u8>> {
        self.received.recv().await
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    script: &ServerScript,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> io::Result<()> {
    let mut tls = acceptor.accept(stream).await?;

    match script {
        ServerScript::Record => {
            let mut buf = Vec::new();
            if let Err(e) = tls.read_to_end(&mut buf).await {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    return Err(e);
                }
            }
            let _ = tx.send(buf);
        }
        ServerScript::Reply(bytes) => {
            tls.write_all(bytes).await?;
            tls.shutdown().await?;
        }
    }

    Ok(())
}

fn server_config(identity: &DevIdentity) -> Result<ServerConfig> {
    let provider = crypto_provider();

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut identity.ca_cert.as_bytes()) {
        roots.add(cert?)?;
    }
    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone()).build()?;

    let chain = rustls_pemfile::certs(&mut identity.server_cert.as_bytes())
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut identity.server_key.as_bytes())?
        .ok_or_else(|| anyhow!("No server private key in development identity"))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)?;

    Ok(config)
}
