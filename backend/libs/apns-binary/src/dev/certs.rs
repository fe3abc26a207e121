//! Certificate generation for development and testing
//!
//! Produces a throwaway CA, a server certificate for `127.0.0.1`/`localhost`
//! and a client certificate that stands in for a push service certificate.

use anyhow::{anyhow, Context, Result};
use pkcs8::pkcs5::pbes2;
use pkcs8::{LineEnding, PrivateKeyInfo};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, SanType,
};
use tracing::info;

/// PBKDF2 rounds for test keys; low on purpose so tests stay fast
const DEV_PBKDF2_ROUNDS: u32 = 2048;

/// Bundle of PEM material for a loopback gateway and its client
#[derive(Clone)]
pub struct DevIdentity {
    /// CA certificate, trusted by both sides
    pub ca_cert: String,
    pub server_cert: String,
    pub server_key: String,
    /// Client certificate signed by the CA
    pub client_cert: String,
    /// Unencrypted PKCS#8 client key
    pub client_key: String,
}

/// Generate a CA plus server and client certificates signed by it
pub fn generate_dev_identity() -> Result<DevIdentity> {
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = DistinguishedName::new();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "Nova Push Development CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let ca_keypair = KeyPair::generate()?;
    let ca_cert = ca_params
        .self_signed(&ca_keypair)
        .context("Failed to generate CA certificate")?;

    let mut server_params = CertificateParams::new(vec!["localhost".to_string()])
        .context("Failed to build server certificate params")?;
    server_params
        .distinguished_name
        .push(DnType::CommonName, "localhost");
    server_params
        .subject_alt_names
        .push(SanType::IpAddress(std::net::IpAddr::V4(
            std::net::Ipv4Addr::LOCALHOST,
        )));

    let server_keypair = KeyPair::generate()?;
    let server_cert = server_params
        .signed_by(&server_keypair, &ca_cert, &ca_keypair)
        .context("Failed to sign server certificate")?;

    let mut client_params = CertificateParams::default();
    client_params.distinguished_name = DistinguishedName::new();
    client_params
        .distinguished_name
        .push(DnType::CommonName, "Apple Development IOS Push Services: dev.nova.push");

    let client_keypair = KeyPair::generate()?;
    let client_cert = client_params
        .signed_by(&client_keypair, &ca_cert, &ca_keypair)
        .context("Failed to sign client certificate")?;

    info!("Generated development push certificates (CA, server, client)");

    Ok(DevIdentity {
        ca_cert: ca_cert.pem(),
        server_cert: server_cert.pem(),
        server_key: server_keypair.serialize_pem(),
        client_cert: client_cert.pem(),
        client_key: client_keypair.serialize_pem(),
    })
}

/// Re-encode a PKCS#8 `PRIVATE KEY` as `ENCRYPTED PRIVATE KEY` (PBES2, AES-256-CBC)
pub fn encrypt_private_key(key_pem: &str, passphrase: &str) -> Result<String> {
    let block = pem::parse(key_pem).context("Failed to parse private key PEM")?;
    let info = PrivateKeyInfo::try_from(block.contents())
        .map_err(|e| anyhow!("Failed to decode PKCS#8 key: {e}"))?;

    let salt: [u8; 16] = rand::random();
    let iv: [u8; 16] = rand::random();
    let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(DEV_PBKDF2_ROUNDS, &salt, &iv)
        .map_err(|e| anyhow!("Failed to build PBES2 parameters: {e}"))?;

    let encrypted = info
        .encrypt_with_params(params, passphrase)
        .map_err(|e| anyhow!("Failed to encrypt private key: {e}"))?;
    let pem = encrypted
        .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
        .map_err(|e| anyhow!("Failed to encode encrypted key: {e}"))?;

    Ok(pem.to_string())
}
