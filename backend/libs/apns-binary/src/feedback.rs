//! Feedback service records
//!
//! The feedback service streams fixed 38 byte records, one per device that
//! stopped accepting notifications, then closes the connection:
//!
//! ```text
//! | timestamp (u32 BE) | token length (u16 BE) = 32 | token (32 bytes) |
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::{ChannelResult, FrameError, FrameResult};
use crate::frame::{decode_token, TOKEN_LENGTH};

pub const RECORD_LENGTH: usize = 4 + 2 + TOKEN_LENGTH;

const READ_BUFFER: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// Seconds since the epoch at which the provider saw the app gone
    pub timestamp: u32,
    /// Lowercase hex token
    pub token: String,
}

impl FeedbackRecord {
    pub fn decode(bytes: &[u8]) -> FrameResult<Self> {
        if bytes.len() < RECORD_LENGTH {
            return Err(FrameError::Truncated {
                expected: RECORD_LENGTH,
                actual: bytes.len(),
            });
        }

        let timestamp = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let token_len = u16::from_be_bytes([bytes[4], bytes[5]]);
        if token_len as usize != TOKEN_LENGTH {
            return Err(FrameError::UnexpectedTokenLength(token_len));
        }

        Ok(Self {
            timestamp,
            token: hex::encode(&bytes[6..RECORD_LENGTH]),
        })
    }

    pub fn encode(&self) -> FrameResult<Vec<u8>> {
        let token = decode_token(&self.token)?;

        let mut bytes = Vec::with_capacity(RECORD_LENGTH);
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&(TOKEN_LENGTH as u16).to_be_bytes());
        bytes.extend_from_slice(&token);
        Ok(bytes)
    }

    pub fn reported_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }
}

/// Reads records until the peer closes the channel.
///
/// Zero records is a normal outcome. Records with a bad token length and a
/// trailing partial record are dropped with a warning.
pub async fn read_records(channel: &mut dyn Channel) -> ChannelResult<Vec<FeedbackRecord>> {
    let mut records = Vec::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_BUFFER];

    loop {
        let n = channel.receive(&mut buf).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);

        let complete = pending.len() / RECORD_LENGTH * RECORD_LENGTH;
        for chunk in pending[..complete].chunks_exact(RECORD_LENGTH) {
            match FeedbackRecord::decode(chunk) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed feedback record: {}", e),
            }
        }
        pending.drain(..complete);
    }

    if !pending.is_empty() {
        warn!(
            bytes = pending.len(),
            "Feedback channel closed mid-record, discarding partial record"
        );
    }

    debug!(records = records.len(), "Feedback channel drained");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use std::collections::VecDeque;

    const TOKEN_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const TOKEN_B: &str = "0fd12510cfe6b0a4a89dc7369c96df956f991e66131dab63398734e8000d0029";

    /// Replays reads in the given slices, then reports close
    struct ScriptedReads(VecDeque<Vec<u8>>);

    #[async_trait::async_trait]
    impl Channel for ScriptedReads {
        async fn send(&mut self, _bytes: &[u8]) -> ChannelResult<()> {
            Err(ChannelError::Closed)
        }

        async fn receive(&mut self, buf: &mut [u8]) -> ChannelResult<usize> {
            match self.0.pop_front() {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                None => Ok(0),
            }
        }

        async fn close(&mut self) {}
    }

    fn record(timestamp: u32, token: &str) -> Vec<u8> {
        FeedbackRecord {
            timestamp,
            token: token.to_string(),
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_decode_record() {
        let bytes = record(1_700_000_000, TOKEN_B);
        assert_eq!(bytes.len(), 38);

        let decoded = FeedbackRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.timestamp, 1_700_000_000);
        assert_eq!(decoded.token, TOKEN_B);
        assert_eq!(decoded.reported_at().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let mut bytes = record(1, TOKEN_A);
        bytes[5] = 20;
        assert_eq!(
            FeedbackRecord::decode(&bytes),
            Err(FrameError::UnexpectedTokenLength(20))
        );
    }

    #[tokio::test]
    async fn test_read_records_across_split_reads() {
        let mut stream = record(1, TOKEN_A);
        stream.extend(record(2, TOKEN_B));
        // Split in the middle of the second record
        let (first, second) = stream.split_at(50);

        let mut channel = ScriptedReads(VecDeque::from(vec![first.to_vec(), second.to_vec()]));
        let records = read_records(&mut channel).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].token, TOKEN_A);
        assert_eq!(records[1].token, TOKEN_B);
    }

    #[tokio::test]
    async fn test_read_records_empty_stream() {
        let mut channel = ScriptedReads(VecDeque::new());
        assert!(read_records(&mut channel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_trailing_record_dropped() {
        let mut stream = record(1, TOKEN_A);
        stream.extend_from_slice(&record(2, TOKEN_B)[..10]);

        let mut channel = ScriptedReads(VecDeque::from(vec![stream]));
        let records = read_records(&mut channel).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token, TOKEN_A);
    }
}
