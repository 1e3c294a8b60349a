use anyhow::Context;
use clap::Parser as ClapParser;
use log_replayer::config::{Mode, parse_broker_list};
use log_replayer::{
    Config, CsvEscaping, CsvWriter, Pacing, ParserRegistry, Producer, Scheduler, ShutdownMode,
    Sink, TimelineBuilder,
};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "replayer.json";

#[derive(ClapParser)]
#[command(
    author,
    version,
    about = "Replays a log file to a broker topic with its original timing, or converts it to CSV"
)]
struct Args {
    /// Stream log messages to the broker
    #[arg(short = 'm', long, conflicts_with = "csv")]
    messages: bool,

    /// Write log messages to a CSV file
    #[arg(short = 'c', long)]
    csv: bool,

    /// Input log file
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Output CSV file
    #[arg(short = 'o', long)]
    out_file: Option<PathBuf>,

    /// Line parser (default, httpd)
    #[arg(short = 'p', long)]
    parser: Option<String>,

    /// Broker addresses, comma separated
    #[arg(short = 'b', long)]
    broker_list: Option<String>,

    /// API key used as the SASL PLAIN password
    #[arg(short = 'k', long, env = "LOG_REPLAYER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// SASL username sent with the API key
    #[arg(long)]
    username: Option<String>,

    /// Destination topic
    #[arg(short = 't', long)]
    topic: Option<String>,

    /// Replay speed multiplier (0 sends as fast as possible)
    #[arg(short = 'r', long)]
    rate: Option<f64>,

    /// Configuration file (JSON), replayer.json when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop at the first failed send instead of logging and continuing
    #[arg(long)]
    abort_on_error: bool,

    /// Wait for the broker to acknowledge each message before the next one
    #[arg(long)]
    await_acks: bool,

    /// Maximum number of messages buffered for the broker
    #[arg(long)]
    buffer_max_messages: Option<usize>,

    /// How delays are measured: relative or anchored
    #[arg(long)]
    pacing: Option<Pacing>,

    /// Quote CSV values containing delimiters, quotes or line breaks
    #[arg(long)]
    escape_csv: bool,

    /// Index of the first message to send
    #[arg(long)]
    start_index: Option<usize>,
}

impl Args {
    /// Flags win over values from the config file.
    fn apply(self, mut config: Config) -> Config {
        if self.csv {
            config.mode = Mode::Csv;
        } else if self.messages {
            config.mode = Mode::Messages;
        }

        if let Some(file) = self.file {
            config.input = Some(file);
        }
        if let Some(out_file) = self.out_file {
            config.output = Some(out_file);
        }
        if let Some(parser) = self.parser {
            config.parser = parser;
        }
        if let Some(list) = self.broker_list {
            config.broker.brokers = parse_broker_list(&list);
        }
        if let Some(api_key) = self.api_key {
            config.broker.api_key = Some(api_key);
        }
        if let Some(username) = self.username {
            config.broker.username = username;
        }
        if let Some(topic) = self.topic {
            config.broker.topic = Some(topic);
        }
        if let Some(rate) = self.rate {
            config.replay.rate = rate;
        }
        if let Some(buffer) = self.buffer_max_messages {
            config.broker.buffer_max_messages = buffer;
        }
        if let Some(pacing) = self.pacing {
            config.replay.pacing = pacing;
        }
        if let Some(start_index) = self.start_index {
            config.replay.start_index = start_index;
        }
        if self.escape_csv {
            config.csv.escaping = CsvEscaping::Rfc4180;
        }
        config.replay.abort_on_error |= self.abort_on_error;
        config.broker.await_acks |= self.await_acks;

        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_or_default(path, true)?,
        None => Config::load_or_default(DEFAULT_CONFIG_FILE, false)?,
    };
    let config = args.apply(config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let registry = ParserRegistry::with_builtin();
    let parser = registry.create(&config.parser);
    let builder = TimelineBuilder::new(parser)
        .with_progress_interval(config.replay.parse_progress_interval);
    let input = config.input.clone().unwrap_or_default();

    match config.mode {
        Mode::Csv => {
            info!("-- Parsing File --");
            let timeline = builder
                .build_from_file(&input)
                .await
                .with_context(|| format!("failed to parse {}", input.display()))?;

            info!("-- Converting to CSV --");
            let output = config.output.clone().unwrap_or_default();
            let rows = CsvWriter::new(config.csv.escaping)
                .write(&output, &timeline)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!("Wrote {} rows to {}", rows, output.display());
        }
        Mode::Messages => {
            let scheduler = Scheduler::new(config.replay_options())?;
            let mut producer = Producer::new(config.producer_config());

            info!("-- Connecting to broker --");
            Sink::connect(&mut producer)
                .await
                .context("broker connection failed")?;
            info!("-- Connected --");

            info!("-- Parsing File --");
            let timeline = builder
                .build_from_file(&input)
                .await
                .with_context(|| format!("failed to parse {}", input.display()))?;

            info!("-- Sending Messages --");
            let mut handle = scheduler.spawn(timeline, producer, config.topic().to_string());
            let control = handle.control().clone();

            let report = tokio::select! {
                report = &mut handle => report?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Received shutdown signal, stopping replay...");
                    control.shutdown(ShutdownMode::Abort);
                    handle.await?
                }
            };

            info!(
                "Sent {} of {} attempted messages ({} failed)",
                report.sent, report.attempted, report.failed
            );
            if report.cancelled {
                anyhow::bail!("replay interrupted after {} messages", report.attempted);
            }
        }
    }

    Ok(())
}
