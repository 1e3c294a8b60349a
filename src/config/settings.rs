use crate::client::{Credentials, DeliveryMode, ProducerConfig};
use crate::client::producer::DEFAULT_BUFFER_MAX_MESSAGES;
use crate::csv::CsvEscaping;
use crate::replay::{DEFAULT_PROGRESS_INTERVAL, Pacing, ReplayOptions};
use crate::timeline::builder::DEFAULT_PROGRESS_INTERVAL as DEFAULT_PARSE_PROGRESS_INTERVAL;
use crate::{ReplayError, ReplayResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Replay to a broker topic.
    #[default]
    Messages,
    /// Dump the timeline to a CSV file.
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub parser: String,
    pub broker: BrokerSettings,
    pub replay: ReplaySettings,
    pub csv: CsvSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub brokers: Vec<String>,
    pub topic: Option<String>,
    pub client_id: String,
    pub username: String,
    pub api_key: Option<String>,
    pub partition: u32,
    pub buffer_max_messages: usize,
    pub await_acks: bool,
    pub connect_timeout_ms: u64,
    pub flush_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    pub rate: f64,
    pub abort_on_error: bool,
    pub progress_interval: usize,
    pub parse_progress_interval: u64,
    pub start_index: usize,
    pub pacing: Pacing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSettings {
    pub escaping: CsvEscaping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Messages,
            input: None,
            output: None,
            parser: "default".to_string(),
            broker: BrokerSettings::default(),
            replay: ReplaySettings::default(),
            csv: CsvSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            topic: None,
            client_id: "log-replayer".to_string(),
            username: crate::client::producer::DEFAULT_API_KEY_USERNAME.to_string(),
            api_key: None,
            partition: 0,
            buffer_max_messages: DEFAULT_BUFFER_MAX_MESSAGES,
            await_acks: false,
            connect_timeout_ms: 10_000,
            flush_timeout_ms: 30_000,
        }
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            abort_on_error: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            parse_progress_interval: DEFAULT_PARSE_PROGRESS_INTERVAL,
            start_index: 0,
            pacing: Pacing::Relative,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> ReplayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplayError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| ReplayError::Config(format!("bad config {}: {}", path.display(), e)))
    }

    /// A missing file is only an error when the path was asked for explicitly.
    pub fn load_or_default(path: impl AsRef<Path>, explicit: bool) -> ReplayResult<Self> {
        let path = path.as_ref();
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> ReplayResult<()> {
        if self.input.is_none() {
            return Err(ReplayError::Config("an input file is required".to_string()));
        }

        match self.mode {
            Mode::Csv => {
                if self.output.is_none() {
                    return Err(ReplayError::Config(
                        "an output file is required for CSV mode".to_string(),
                    ));
                }
            }
            Mode::Messages => {
                if self.broker.brokers.is_empty() {
                    return Err(ReplayError::Config("a broker list is required".to_string()));
                }
                if self.broker.topic.as_deref().is_none_or(str::is_empty) {
                    return Err(ReplayError::Config("a topic is required".to_string()));
                }
            }
        }

        self.replay_options().validate()
    }

    pub fn topic(&self) -> &str {
        self.broker.topic.as_deref().unwrap_or_default()
    }

    pub fn producer_config(&self) -> ProducerConfig {
        let broker = &self.broker;
        ProducerConfig {
            brokers: broker.brokers.clone(),
            client_id: broker.client_id.clone(),
            credentials: broker.api_key.as_ref().map(|key| Credentials {
                username: broker.username.clone(),
                ..Credentials::api_key(key.clone())
            }),
            partition: broker.partition,
            buffer_max_messages: broker.buffer_max_messages,
            delivery: if broker.await_acks {
                DeliveryMode::AwaitAck
            } else {
                DeliveryMode::FireAndForget
            },
            connect_timeout: Duration::from_millis(broker.connect_timeout_ms),
            flush_timeout: Duration::from_millis(broker.flush_timeout_ms),
        }
    }

    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            rate: self.replay.rate,
            abort_on_error: self.replay.abort_on_error,
            progress_interval: self.replay.progress_interval,
            start_index: self.replay.start_index,
            pacing: self.replay.pacing,
        }
    }
}

/// Splits a comma separated broker list, dropping blanks.
pub fn parse_broker_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
