use super::Timeline;
use crate::ReplayResult;
use crate::parser::{LineParser, Parser};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub lines_read: u64,
    pub accepted: u64,
    pub skipped: u64,
}

/// Reads lines through a parser into a [`Timeline`].
#[derive(Debug, Clone)]
pub struct TimelineBuilder {
    parser: Parser,
    progress_interval: u64,
}

impl TimelineBuilder {
    pub fn new(parser: Parser) -> Self {
        Self {
            parser,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, lines: u64) -> Self {
        self.progress_interval = lines.max(1);
        self
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub async fn build_from_file(&self, path: impl AsRef<Path>) -> ReplayResult<Timeline> {
        let path = path.as_ref();
        info!("Parsing {:?} with '{}' parser", path, self.parser.name());

        let file = File::open(path).await?;
        self.build(BufReader::new(file)).await
    }

    /// Invalid lines are skipped silently. A read error fails the whole build.
    pub async fn build<R>(&self, reader: R) -> ReplayResult<Timeline>
    where
        R: AsyncBufRead + Unpin,
    {
        let (timeline, stats) = self.build_with_stats(reader).await?;
        info!(
            "Parsed {} lines: {} messages, {} skipped",
            stats.lines_read, stats.accepted, stats.skipped
        );
        Ok(timeline)
    }

    pub async fn build_with_stats<R>(&self, reader: R) -> ReplayResult<(Timeline, BuildStats)>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut timeline = Timeline::new();
        let mut stats = BuildStats::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            stats.lines_read += 1;

            if self.parser.is_valid(&line) {
                timeline.push(self.parser.create_message(&line));
                stats.accepted += 1;
            } else {
                debug!("Skipping line {}", stats.lines_read);
                stats.skipped += 1;
            }

            if stats.lines_read % self.progress_interval == 0 {
                info!("Parsed {} records", stats.lines_read);
            }
        }

        Ok((timeline, stats))
    }
}
