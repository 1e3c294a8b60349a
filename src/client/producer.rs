use crate::network::protocol::{
    self, AuthenticateRequest, ProduceRecord, ProduceRequest, Request, Response,
};
use crate::replay::Sink;
use crate::{Message, ReplayError, ReplayResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BUFFER_MAX_MESSAGES: usize = 2_000_000;
pub const DEFAULT_API_KEY_USERNAME: &str = "token";

/// Whether `send` waits for the broker to acknowledge each record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Records are queued and written in the background. Delivery reports
    /// arrive out of band and are only counted.
    #[default]
    FireAndForget,
    AwaitAck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// SASL PLAIN with the fixed `token` user and an API key as password.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            mechanism: "PLAIN".to_string(),
            username: DEFAULT_API_KEY_USERNAME.to_string(),
            password: key.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub partition: u32,
    /// Capacity of the fire-and-forget send queue.
    pub buffer_max_messages: usize,
    pub delivery: DeliveryMode,
    pub connect_timeout: Duration,
    pub flush_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["127.0.0.1:9092".to_string()],
            client_id: "log-replayer".to_string(),
            credentials: None,
            partition: 0,
            buffer_max_messages: DEFAULT_BUFFER_MAX_MESSAGES,
            delivery: DeliveryMode::FireAndForget,
            connect_timeout: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DeliverySnapshot {
    pub fn outstanding(&self) -> u64 {
        self.enqueued.saturating_sub(self.delivered + self.failed)
    }
}

/// Delivery report counters shared with the background connection tasks.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    changed: Notify,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            enqueued: self.enqueued.load(Ordering::Acquire),
            delivered: self.delivered.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }

    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::AcqRel);
    }

    fn revert_enqueued(&self) {
        self.enqueued.fetch_sub(1, Ordering::AcqRel);
    }

    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::AcqRel);
        self.changed.notify_waiters();
    }

    fn record_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::AcqRel);
        self.changed.notify_waiters();
    }

    async fn wait_idle(&self) {
        loop {
            let changed = self.changed.notified();
            if self.snapshot().outstanding() == 0 {
                return;
            }
            changed.await;
        }
    }
}

enum Connection {
    Queued {
        queue: mpsc::Sender<Vec<u8>>,
        writer: JoinHandle<()>,
        reader: JoinHandle<()>,
    },
    Inline {
        stream: TcpStream,
    },
}

/// Broker sink: publishes JSON message bodies to a topic over a single
/// long-lived connection.
pub struct Producer {
    config: ProducerConfig,
    stats: Arc<DeliveryStats>,
    connection: Option<Connection>,
}

impl Producer {
    pub fn new(config: ProducerConfig) -> Self {
        info!(
            "Creating producer with client_id: '{}' ({:?})",
            config.client_id, config.delivery
        );
        Self {
            config,
            stats: Arc::new(DeliveryStats::default()),
            connection: None,
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn delivery_stats(&self) -> DeliverySnapshot {
        self.stats.snapshot()
    }

    /// Tries each broker in turn. Succeeds once a broker has accepted the
    /// credentials (if any) and answered a metadata request.
    pub async fn connect(&mut self) -> ReplayResult<()> {
        if self.config.brokers.is_empty() {
            return Err(ReplayError::Connection("no brokers configured".to_string()));
        }

        let mut failures = Vec::new();
        for address in &self.config.brokers {
            match timeout(self.config.connect_timeout, self.handshake(address)).await {
                Ok(Ok(stream)) => {
                    info!("Producer '{}' connected to {}", self.config.client_id, address);
                    self.connection = Some(self.start(stream));
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!("Broker {} unavailable: {}", address, e);
                    failures.push(format!("{}: {}", address, e));
                }
                Err(_) => {
                    warn!("Broker {} timed out", address);
                    failures.push(format!(
                        "{}: timed out after {:?}",
                        address, self.config.connect_timeout
                    ));
                }
            }
        }

        Err(ReplayError::Connection(failures.join("; ")))
    }

    async fn handshake(&self, address: &str) -> ReplayResult<TcpStream> {
        debug!(
            "Producer '{}' connecting to broker at {}",
            self.config.client_id, address
        );
        let mut stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;

        if let Some(credentials) = &self.config.credentials {
            let request = Request::Authenticate(AuthenticateRequest {
                mechanism: credentials.mechanism.clone(),
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            });
            protocol::write_request(&mut stream, &request).await?;

            match protocol::read_response(&mut stream).await? {
                Response::AuthenticateSuccess => debug!("Authenticated as '{}'", credentials.username),
                Response::Error { message } => {
                    return Err(ReplayError::Connection(format!(
                        "authentication failed: {}",
                        message
                    )));
                }
                other => {
                    return Err(ReplayError::Protocol(format!(
                        "unexpected authentication response: {:?}",
                        other
                    )));
                }
            }
        }

        protocol::write_request(&mut stream, &Request::ListTopics).await?;
        match protocol::read_response(&mut stream).await? {
            Response::ListTopicsSuccess { topics } => {
                debug!("Broker {} reports {} topics", address, topics.len());
                Ok(stream)
            }
            Response::Error { message } => Err(ReplayError::Connection(message)),
            other => Err(ReplayError::Protocol(format!(
                "unexpected metadata response: {:?}",
                other
            ))),
        }
    }

    fn start(&self, stream: TcpStream) -> Connection {
        match self.config.delivery {
            DeliveryMode::AwaitAck => Connection::Inline { stream },
            DeliveryMode::FireAndForget => {
                let (read_half, write_half) = stream.into_split();
                let (queue, frames) = mpsc::channel(self.config.buffer_max_messages.max(1));

                let writer = tokio::spawn(write_loop(write_half, frames, self.stats.clone()));
                let reader = tokio::spawn(delivery_report_loop(read_half, self.stats.clone()));

                Connection::Queued {
                    queue,
                    writer,
                    reader,
                }
            }
        }
    }

    fn record_for(&self, topic: &str, message: &Message) -> ReplayResult<Vec<u8>> {
        let record = ProduceRecord::new(
            topic.to_string(),
            self.config.partition,
            message.to_json_bytes()?,
        )
        .with_header("content-type".to_string(), "application/json".to_string());

        protocol::encode(&Request::Produce(ProduceRequest {
            topic: topic.to_string(),
            partition: self.config.partition,
            record,
        }))
    }

    pub async fn send(&mut self, topic: &str, message: &Message) -> ReplayResult<()> {
        let frame = self.record_for(topic, message)?;

        match self.connection.as_mut() {
            None => Err(ReplayError::Connection("producer is not connected".to_string())),
            Some(Connection::Queued { queue, .. }) => {
                self.stats.record_enqueued();
                queue.try_send(frame).map_err(|e| {
                    self.stats.revert_enqueued();
                    match e {
                        mpsc::error::TrySendError::Full(_) => {
                            ReplayError::QueueFull(self.config.buffer_max_messages)
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            ReplayError::Connection("broker connection closed".to_string())
                        }
                    }
                })
            }
            Some(Connection::Inline { stream }) => {
                self.stats.record_enqueued();
                if let Err(e) = protocol::write_frame(stream, &frame).await {
                    self.stats.record_failed(1);
                    return Err(e);
                }

                match protocol::read_response(stream).await {
                    Ok(Response::ProduceSuccess { offset }) => {
                        debug!("Delivered to '{}' at offset {}", topic, offset);
                        self.stats.record_delivered();
                        Ok(())
                    }
                    Ok(Response::Error { message }) => {
                        self.stats.record_failed(1);
                        Err(ReplayError::Broker(message))
                    }
                    Ok(other) => {
                        self.stats.record_failed(1);
                        Err(ReplayError::Protocol(format!(
                            "unexpected produce response: {:?}",
                            other
                        )))
                    }
                    Err(e) => {
                        self.stats.record_failed(1);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Waits until every queued record has a delivery report.
    pub async fn flush(&mut self) -> ReplayResult<()> {
        if timeout(self.config.flush_timeout, self.stats.wait_idle())
            .await
            .is_err()
        {
            let snapshot = self.stats.snapshot();
            return Err(ReplayError::Broker(format!(
                "{} deliveries still outstanding after {:?}",
                snapshot.outstanding(),
                self.config.flush_timeout
            )));
        }

        let snapshot = self.stats.snapshot();
        info!(
            "Producer '{}' flushed: {} delivered, {} failed",
            self.config.client_id, snapshot.delivered, snapshot.failed
        );
        Ok(())
    }

    /// Closes the connection once queued records have been written.
    pub async fn close(&mut self) {
        match self.connection.take() {
            Some(Connection::Queued {
                queue,
                writer,
                reader,
            }) => {
                drop(queue);
                let _ = writer.await;
                reader.abort();
            }
            Some(Connection::Inline { mut stream }) => {
                let _ = stream.shutdown().await;
            }
            None => {}
        }
    }
}

#[async_trait]
impl Sink for Producer {
    async fn connect(&mut self) -> ReplayResult<()> {
        Producer::connect(self).await
    }

    async fn send(&mut self, topic: &str, message: &Message) -> ReplayResult<()> {
        Producer::send(self, topic, message).await
    }

    async fn flush(&mut self) -> ReplayResult<()> {
        Producer::flush(self).await
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Vec<u8>>,
    stats: Arc<DeliveryStats>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = protocol::write_frame(&mut writer, &frame).await {
            error!("Broker write failed: {}", e);
            stats.record_failed(1);
            break;
        }
    }

    frames.close();
    let mut dropped = 0;
    while frames.recv().await.is_some() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!("Dropped {} queued records after write failure", dropped);
        stats.record_failed(dropped);
    }

    let _ = writer.shutdown().await;
}

async fn delivery_report_loop(mut reader: OwnedReadHalf, stats: Arc<DeliveryStats>) {
    loop {
        match protocol::read_response(&mut reader).await {
            Ok(Response::ProduceSuccess { offset }) => {
                debug!("Delivery report: offset {}", offset);
                stats.record_delivered();
            }
            Ok(Response::Error { message }) => {
                warn!("Delivery failed: {}", message);
                stats.record_failed(1);
            }
            Ok(other) => {
                warn!("Unexpected delivery report: {:?}", other);
                stats.record_failed(1);
            }
            Err(e) => {
                let outstanding = stats.snapshot().outstanding();
                if outstanding > 0 {
                    warn!(
                        "Delivery reports ended with {} outstanding: {}",
                        outstanding, e
                    );
                    stats.record_failed(outstanding);
                }
                break;
            }
        }
    }
}
