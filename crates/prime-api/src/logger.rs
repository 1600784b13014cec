//! Logger sink.
//!
//! Every role mirrors its traffic to one logger endpoint. The sink binds
//! that endpoint and hands out one [`LogRecord`] per datagram. Datagrams
//! that do not decode are kept raw rather than dropped.

use chrono::{DateTime, Utc};
use prime_protocol::Frame;
use serde_json::{json, Value as Json};
use tracing::info;

use crate::directory::{Directory, InterfaceConfig};
use crate::error::ApiResult;
use crate::transport::{Endpoint, Inbox, PeerMode, Transport};

/// Decoded content of one logged datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Frame(Frame),
    /// Bytes that did not decode as a frame
    Raw,
}

/// One datagram received by the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub received_at: DateTime<Utc>,
    pub from: Option<Endpoint>,
    pub bytes: Vec<u8>,
    pub entry: LogEntry,
}

impl LogRecord {
    /// One JSON line describing the record.
    ///
    /// Slow-path documents are embedded as-is; fast-path frames and raw
    /// bytes are carried as text.
    pub fn to_json(&self) -> Json {
        let from = self.from.as_ref().map(ToString::to_string);
        let received_at = self.received_at.to_rfc3339();
        match &self.entry {
            LogEntry::Frame(Frame::Slow(_)) => json!({
                "received_at": received_at,
                "from": from,
                "path": "slow",
                "doc": serde_json::from_slice::<Json>(&self.bytes).unwrap_or(Json::Null),
            }),
            LogEntry::Frame(Frame::Fast(frame)) => json!({
                "received_at": received_at,
                "from": from,
                "path": "fast",
                "tag": frame.tag().to_string(),
                "ts": frame.timestamp(),
                "text": String::from_utf8_lossy(&self.bytes),
            }),
            LogEntry::Raw => json!({
                "received_at": received_at,
                "from": from,
                "path": "raw",
                "text": String::from_utf8_lossy(&self.bytes),
            }),
        }
    }
}

/// Receiving end of the logger channel.
#[derive(Debug)]
pub struct LoggerSink {
    transport: Transport,
    inbox: Inbox,
}

impl LoggerSink {
    pub fn bind(config: &InterfaceConfig) -> ApiResult<Self> {
        let binding = Directory::new(config).logger_sink()?;
        let (transport, inbox) = Transport::with_inbox(&binding, PeerMode::Server)?;
        info!(endpoint = ?transport.local_addr(), "Logger sink bound");
        Ok(Self { transport, inbox })
    }

    pub fn local_addr(&self) -> Option<&Endpoint> {
        self.transport.local_addr()
    }

    /// Waits for the next datagram. `None` once the sink is closed.
    pub async fn next(&mut self) -> Option<LogRecord> {
        let datagram = self.inbox.recv().await?;
        let entry = match Frame::decode(&datagram.bytes) {
            Ok(frame) => LogEntry::Frame(frame),
            Err(_) => LogEntry::Raw,
        };
        Some(LogRecord {
            received_at: Utc::now(),
            from: datagram.from,
            bytes: datagram.bytes,
            entry,
        })
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Binding;
    use prime_core::Value;
    use prime_protocol::{FastFrame, SlowFrame, SlowMessage};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_sink_records_every_datagram() {
        let dir = tempfile::tempdir().unwrap();
        let config = InterfaceConfig::with_socket_dir(dir.path());
        let mut sink = LoggerSink::bind(&config).unwrap();
        let sender = Transport::send_only(&Binding::connect(Endpoint::Unix(
            dir.path().join("logger.uds"),
        )))
        .unwrap();

        sender.send(
            &SlowFrame::new(SlowMessage::AppRegister {
                proc_id: 5,
                ur_id: 0,
            })
            .encode()
            .unwrap(),
        );
        sender.send(
            &FastFrame::MonitorSet {
                id: 2,
                val: Value::Cont(42.0),
                proc_id: 5,
                ts: 77,
            }
            .encode(),
        );
        sender.send(b"not a frame");

        let slow = timeout(Duration::from_secs(2), sink.next()).await.unwrap().unwrap();
        let doc = slow.to_json();
        assert_eq!(doc["path"], "slow");
        assert_eq!(doc["doc"]["type"], "PRIME_API_APP_REG");

        let fast = timeout(Duration::from_secs(2), sink.next()).await.unwrap().unwrap();
        let doc = fast.to_json();
        assert_eq!(doc["path"], "fast");
        assert_eq!(doc["ts"], 77);

        let raw = timeout(Duration::from_secs(2), sink.next()).await.unwrap().unwrap();
        assert_eq!(raw.entry, LogEntry::Raw);
        assert_eq!(raw.to_json()["text"], "not a frame");
    }
}
