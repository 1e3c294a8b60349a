use super::{Pacing, ReplayOptions, ReplayReport, Sink};
use crate::timeline::Timeline;
use crate::{ReplayError, ReplayResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound for a single wait, so absurd gaps cannot overflow the clock.
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Send everything left without waiting, then flush.
    Drain,
    /// Stop before the next send.
    Abort,
}

/// Stop signals checked before every step and raced against every wait.
#[derive(Debug, Clone, Default)]
pub struct ReplayControl {
    drain: CancellationToken,
    abort: CancellationToken,
}

impl ReplayControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self, mode: ShutdownMode) {
        match mode {
            ShutdownMode::Drain => self.drain.cancel(),
            ShutdownMode::Abort => self.abort.cancel(),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.drain.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }
}

/// Re-emits a timeline to a sink, spacing sends by the logical-time gap
/// between consecutive messages divided by the rate.
#[derive(Debug, Clone)]
pub struct Scheduler {
    options: ReplayOptions,
}

impl Scheduler {
    pub fn new(options: ReplayOptions) -> ReplayResult<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    /// Wait before the next send for a logical gap of `delta_ms`.
    /// Non-positive gaps fire immediately.
    pub fn delay_for(&self, delta_ms: i64) -> Duration {
        if self.options.is_unthrottled() || delta_ms <= 0 {
            return Duration::ZERO;
        }

        let seconds = delta_ms as f64 / 1000.0 / self.options.rate;
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }

    /// Runs the replay on the current task.
    ///
    /// Messages go out strictly in timeline order: each step sends one message,
    /// advances the cursor, then waits for the next one to come due.
    pub async fn replay<S>(
        &self,
        timeline: &Timeline,
        sink: &mut S,
        topic: &str,
        control: &ReplayControl,
    ) -> ReplayResult<ReplayReport>
    where
        S: Sink + ?Sized,
    {
        let total = timeline.len();
        let started = Instant::now();
        let mut report = ReplayReport::default();
        let mut index = self.options.start_index;
        let mut due = started;

        info!(
            "Replaying {} messages to '{}' from index {} at rate {}",
            total, topic, index, self.options.rate
        );

        while let Some(message) = timeline.get(index) {
            if control.is_aborted() {
                report.cancelled = true;
                break;
            }

            if index % self.options.progress_interval == 0 {
                info!(
                    "Sent {}% ({}/{})",
                    (index * 100 + total / 2) / total,
                    index,
                    total
                );
            }

            report.attempted += 1;
            match sink.send(topic, message).await {
                Ok(()) => report.sent += 1,
                // a broken sink would fail every remaining message
                Err(e) if self.options.abort_on_error || !e.is_send_error() => {
                    return Err(ReplayError::Send {
                        index,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!("Failed to send message {}: {}", index, e);
                    report.failed += 1;
                }
            }

            index += 1;

            if self.options.is_unthrottled() || control.is_draining() {
                report.drained |= control.is_draining() && index < total;
                continue;
            }

            let Some(delta) = timeline.delta_after(index - 1) else {
                break;
            };

            let delay = self.delay_for(delta);
            let deadline = match self.options.pacing {
                Pacing::Relative => Instant::now() + delay,
                Pacing::Anchored => {
                    due += delay;
                    due
                }
            };

            if deadline <= Instant::now() {
                continue;
            }

            debug!("Next message {} due in {:?}", index, deadline - Instant::now());
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = control.abort.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                _ = control.drain.cancelled() => {
                    info!("Draining {} remaining messages", total - index);
                    report.drained = true;
                }
            }
        }

        if !report.cancelled {
            if let Err(e) = sink.flush().await {
                if self.options.abort_on_error {
                    return Err(e);
                }
                warn!("Flush failed: {}", e);
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Replay finished: {} sent, {} failed{} in {:?}",
            report.sent,
            report.failed,
            if report.cancelled { ", cancelled" } else { "" },
            report.elapsed
        );

        Ok(report)
    }

    /// Runs the replay as its own task.
    pub fn spawn<S>(self, timeline: Timeline, mut sink: S, topic: String) -> ReplayHandle
    where
        S: Sink + 'static,
    {
        let control = ReplayControl::new();
        let task_control = control.clone();

        let task = tokio::spawn(async move {
            self.replay(&timeline, &mut sink, &topic, &task_control)
                .await
        });

        ReplayHandle { control, task }
    }
}

pub struct ReplayHandle {
    control: ReplayControl,
    task: JoinHandle<ReplayResult<ReplayReport>>,
}

impl ReplayHandle {
    pub fn control(&self) -> &ReplayControl {
        &self.control
    }

    /// Waits for the replay to run to completion.
    pub async fn join(self) -> ReplayResult<ReplayReport> {
        self.await
    }

    pub async fn shutdown(self, mode: ShutdownMode) -> ReplayResult<ReplayReport> {
        self.control.shutdown(mode);
        self.join().await
    }
}

impl Future for ReplayHandle {
    type Output = ReplayResult<ReplayReport>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}
