pub mod client;
pub mod config;
pub mod csv;
pub mod network;
pub mod parser;
pub mod replay;
pub mod timeline;

pub use client::{DeliveryMode, Producer, ProducerConfig};
pub use config::Config;
pub use csv::{CsvEscaping, CsvWriter};
pub use parser::{DefaultParser, HttpdParser, LineParser, Parser, ParserRegistry};
pub use replay::{
    Pacing, ReplayControl, ReplayHandle, ReplayOptions, ReplayReport, Scheduler, ShutdownMode,
    Sink,
};
pub use timeline::{Timeline, TimelineBuilder};

use serde::{Deserialize, Serialize};

/// A single replayable record: a parser-defined body plus the time it carried
/// in the source log, in milliseconds of the log's own clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    body: serde_json::Value,
    logical_time_ms: i64,
}

impl Message {
    pub fn new(body: serde_json::Value, logical_time_ms: i64) -> Self {
        Self {
            body,
            logical_time_ms,
        }
    }

    /// Stamps the body with the current wall-clock time (epoch milliseconds).
    pub fn now(body: serde_json::Value) -> Self {
        Self::new(body, chrono::Utc::now().timestamp_millis())
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub fn logical_time_ms(&self) -> i64 {
        self.logical_time_ms
    }

    pub fn into_body(self) -> serde_json::Value {
        self.body
    }

    /// UTF-8 JSON encoding of the body, as sent to the broker.
    pub fn to_json_bytes(&self) -> ReplayResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.body)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Send failed for message {index}: {source}")]
    Send {
        index: usize,
        #[source]
        source: Box<ReplayError>,
    },
    #[error("Producer queue full ({0} messages buffered)")]
    QueueFull(usize),
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Replay task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ReplayError {
    /// True for failures scoped to a single message, which replay may skip
    /// past. Anything else means the sink itself is unusable.
    pub fn is_send_error(&self) -> bool {
        matches!(
            self,
            ReplayError::Send { .. }
                | ReplayError::QueueFull(_)
                | ReplayError::Broker(_)
                | ReplayError::Json(_)
        )
    }
}

pub type ReplayResult<T> = Result<T, ReplayError>;
