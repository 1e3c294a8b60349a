#![allow(dead_code)]

use async_trait::async_trait;
use log_replayer::network::protocol::{self, ProduceRecord, Request, Response};
use log_replayer::{Message, ReplayError, ReplayResult, Sink, Timeline};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};

pub fn timeline_at(times: &[i64]) -> Timeline {
    times
        .iter()
        .enumerate()
        .map(|(i, t)| Message::new(serde_json::json!({ "seq": i }), *t))
        .collect::<Vec<_>>()
        .into()
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub seq: u64,
    pub topic: String,
    pub at: Instant,
}

/// Records every send with the (possibly paused) tokio clock.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub sent: Arc<Mutex<Vec<Sent>>>,
    pub flushes: Arc<Mutex<usize>>,
    /// Sequence numbers whose send fails.
    pub fail_on: Vec<u64>,
    /// Sequence number at which the sink loses its connection.
    pub disconnect_on: Option<u64>,
    /// Virtual time each send takes.
    pub send_cost: Duration,
}

impl RecordingSink {
    pub fn failing_on(seqs: &[u64]) -> Self {
        Self {
            fail_on: seqs.to_vec(),
            ..Self::default()
        }
    }

    pub fn disconnecting_on(seq: u64) -> Self {
        Self {
            disconnect_on: Some(seq),
            ..Self::default()
        }
    }

    pub fn with_send_cost(cost: Duration) -> Self {
        Self {
            send_cost: cost,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.sent().iter().map(|s| s.seq).collect()
    }

    pub fn gaps(&self) -> Vec<Duration> {
        self.sent()
            .windows(2)
            .map(|pair| pair[1].at - pair[0].at)
            .collect()
    }

    pub fn flushes(&self) -> usize {
        *self.flushes.lock().unwrap()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&mut self, topic: &str, message: &Message) -> ReplayResult<()> {
        let seq = message.body()["seq"].as_u64().unwrap_or_default();
        self.sent.lock().unwrap().push(Sent {
            seq,
            topic: topic.to_string(),
            at: Instant::now(),
        });

        if !self.send_cost.is_zero() {
            sleep(self.send_cost).await;
        }

        if self.disconnect_on.is_some_and(|at| seq >= at) {
            return Err(ReplayError::Connection("sink disconnected".to_string()));
        }
        if self.fail_on.contains(&seq) {
            return Err(ReplayError::Broker(format!("rejected {}", seq)));
        }
        Ok(())
    }

    async fn flush(&mut self) -> ReplayResult<()> {
        *self.flushes.lock().unwrap() += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StubOptions {
    /// Password the broker expects, if it requires authentication.
    pub password: Option<String>,
    /// Produce requests whose payload contains this text are rejected.
    pub reject_containing: Option<String>,
}

/// Minimal broker speaking the producer wire protocol.
pub struct StubBroker {
    pub address: String,
    records: Arc<tokio::sync::Mutex<Vec<ProduceRecord>>>,
    task: JoinHandle<()>,
}

impl StubBroker {
    pub async fn start(options: StubOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub broker");
        let address = listener.local_addr().unwrap().to_string();
        let records = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let shared = records.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let records = shared.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, records, options).await;
                });
            }
        });

        Self {
            address,
            records,
            task,
        }
    }

    pub async fn records(&self) -> Vec<ProduceRecord> {
        self.records.lock().await.clone()
    }

    /// Polls until `count` records arrived or a second passed.
    pub async fn wait_for(&self, count: usize) -> Vec<ProduceRecord> {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        loop {
            let records = self.records().await;
            if records.len() >= count || std::time::Instant::now() > deadline {
                return records;
            }
            tokio::task::yield_now().await;
        }
    }
}

impl Drop for StubBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    records: Arc<tokio::sync::Mutex<Vec<ProduceRecord>>>,
    options: StubOptions,
) -> ReplayResult<()> {
    loop {
        let request = match protocol::read_request(&mut stream).await {
            Ok(request) => request,
            Err(_) => break,
        };

        let response = match request {
            Request::Authenticate(auth) => match &options.password {
                Some(expected) if *expected != auth.password => Response::Error {
                    message: "SASL authentication failed".to_string(),
                },
                _ => Response::AuthenticateSuccess,
            },
            Request::ListTopics => Response::ListTopicsSuccess {
                topics: vec!["logs".to_string()],
            },
            Request::Produce(produce) => {
                let payload = String::from_utf8_lossy(&produce.record.payload).to_string();
                match &options.reject_containing {
                    Some(needle) if payload.contains(needle.as_str()) => Response::Error {
                        message: format!("rejected {}", payload),
                    },
                    _ => {
                        let mut records = records.lock().await;
                        records.push(produce.record);
                        Response::ProduceSuccess {
                            offset: records.len() as u64 - 1,
                        }
                    }
                }
            }
        };

        protocol::write_response(&mut stream, &response).await?;
    }

    Ok(())
}
