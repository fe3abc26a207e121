/// Secure channel tests against a loopback TLS server
///
/// This test module covers:
/// - Client certificate authentication, with and without passphrase
/// - Frame delivery over the channel
/// - Feedback records read until the server closes
/// - Connection and handshake failures
use std::time::Duration;

use apns_binary::dev::{encrypt_private_key, generate_dev_identity, LoopbackServer, ServerScript};
use apns_binary::feedback::{read_records, FeedbackRecord};
use apns_binary::frame::{pack, unpack_all};
use apns_binary::{
    Channel, ChannelConfig, ChannelError, Connector, Credentials, Endpoint, Payload,
    SecureConnector,
};

const TOKEN_A: &str = "0fd12510cfe6b0a4a89dc7369c96df956f991e66131dab63398734e8000d0029";
const TOKEN_B: &str = "1111111111111111111111111111111111111111111111111111111111111111";

fn connector(ca_cert: &str) -> SecureConnector {
    SecureConnector::new(
        ChannelConfig::new(Duration::from_secs(5)).with_trust_anchor(ca_cert.to_string()),
    )
}

#[tokio::test]
async fn test_frames_reach_gateway() {
    let identity = generate_dev_identity().unwrap();
    let mut server = LoopbackServer::start(&identity, ServerScript::Record)
        .await
        .unwrap();
    let creds = Credentials::new(identity.client_cert.clone(), Some(identity.client_key.clone()));

    let payload = Payload::new().with_alert("Hello").encode().unwrap();
    let mut channel = connector(&identity.ca_cert)
        .open(&server.endpoint(), &creds)
        .await
        .unwrap();

    channel.send(&pack(&payload, TOKEN_A).unwrap()).await.unwrap();
    channel.send(&pack(&payload, TOKEN_B).unwrap()).await.unwrap();
    channel.close().await;
    // Closing twice is harmless
    channel.close().await;

    let received = tokio::time::timeout(Duration::from_secs(5), server.next_connection())
        .await
        .unwrap()
        .unwrap();
    let frames = unpack_all(&received).unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].token_hex(), TOKEN_A);
    assert_eq!(frames[1].token_hex(), TOKEN_B);
    assert_eq!(frames[0].payload, payload);
}

#[tokio::test]
async fn test_passphrase_protected_key() {
    let identity = generate_dev_identity().unwrap();
    let server = LoopbackServer::start(&identity, ServerScript::Record)
        .await
        .unwrap();
    let encrypted = encrypt_private_key(&identity.client_key, "correct horse").unwrap();
    let connector = connector(&identity.ca_cert);

    let missing = Credentials::new(identity.client_cert.clone(), Some(encrypted.clone()));
    let err = connector.connect(&server.endpoint(), &missing).await.err().unwrap();
    assert!(matches!(err, ChannelError::InvalidCredentials(_)));

    let wrong = Credentials::new(identity.client_cert.clone(), Some(encrypted.clone()))
        .with_passphrase(Some("battery staple".to_string()));
    let err = connector.connect(&server.endpoint(), &wrong).await.err().unwrap();
    assert!(matches!(err, ChannelError::InvalidCredentials(_)));

    let right = Credentials::new(identity.client_cert.clone(), Some(encrypted))
        .with_passphrase(Some("correct horse".to_string()));
    let mut channel = connector.connect(&server.endpoint(), &right).await.unwrap();
    assert!(channel.is_open());
    channel.close().await;
    assert!(!channel.is_open());
}

#[tokio::test]
async fn test_feedback_records_until_close() {
    let identity = generate_dev_identity().unwrap();
    let mut stream = Vec::new();
    for (ts, token) in [(1_700_000_000u32, TOKEN_A), (1_700_000_100, TOKEN_B)] {
        stream.extend(
            FeedbackRecord {
                timestamp: ts,
                token: token.to_string(),
            }
            .encode()
            .unwrap(),
        );
    }
    let server = LoopbackServer::start(&identity, ServerScript::Reply(stream))
        .await
        .unwrap();
    let creds = Credentials::new(identity.client_cert.clone(), Some(identity.client_key.clone()));

    let mut channel = connector(&identity.ca_cert)
        .open(&server.endpoint(), &creds)
        .await
        .unwrap();
    let records = read_records(channel.as_mut()).await.unwrap();
    channel.close().await;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].token, TOKEN_A);
    assert_eq!(records[1].timestamp, 1_700_000_100);
}

#[tokio::test]
async fn test_feedback_with_no_records() {
    let identity = generate_dev_identity().unwrap();
    let server = LoopbackServer::start(&identity, ServerScript::Reply(Vec::new()))
        .await
        .unwrap();
    let creds = Credentials::new(identity.client_cert.clone(), Some(identity.client_key.clone()));

    let mut channel = connector(&identity.ca_cert)
        .open(&server.endpoint(), &creds)
        .await
        .unwrap();

    assert!(read_records(channel.as_mut()).await.unwrap().is_empty());
    channel.close().await;
}

#[tokio::test]
async fn test_connection_refused() {
    let identity = generate_dev_identity().unwrap();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let creds = Credentials::new(identity.client_cert.clone(), Some(identity.client_key.clone()));

    let err = connector(&identity.ca_cert)
        .connect(&Endpoint::new("127.0.0.1", port), &creds)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ChannelError::Connection { .. }));
}

#[tokio::test]
async fn test_untrusted_gateway_fails_handshake() {
    let identity = generate_dev_identity().unwrap();
    let stranger = generate_dev_identity().unwrap();
    let server = LoopbackServer::start(&identity, ServerScript::Record)
        .await
        .unwrap();
    let creds = Credentials::new(identity.client_cert.clone(), Some(identity.client_key.clone()));

    let err = connector(&stranger.ca_cert)
        .connect(&server.endpoint(), &creds)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ChannelError::Handshake { .. }));
}
