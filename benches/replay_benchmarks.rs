use async_trait::async_trait;
use criterion::{BatchSize, Criterion, SamplingMode, Throughput, criterion_group, criterion_main};
use log_replayer::*;
use std::sync::LazyLock;
use tokio::time::Duration;

const LINES: usize = 10_000;

static ACCESS_LOG: LazyLock<String> = LazyLock::new(|| {
    (0..LINES)
        .map(|i| {
            format!(
                "10.0.{}.{} - - [01/Jul/1995:{:02}:{:02}:{:02} -0400] \"GET /page/{} HTTP/1.0\" 200 {}\n",
                i / 256 % 256,
                i % 256,
                i / 3600 % 24,
                i / 60 % 60,
                i % 60,
                i,
                i * 7
            )
        })
        .collect()
});

/// Discards everything, so the benchmark measures the scheduler and encoding.
struct NullSink {
    bytes: usize,
}

#[async_trait]
impl Sink for NullSink {
    async fn send(&mut self, _topic: &str, message: &Message) -> ReplayResult<()> {
        self.bytes += message.to_json_bytes()?.len();
        Ok(())
    }
}

// Configure Criterion for CI environment
fn configure_criterion() -> Criterion {
    if std::env::var("CI").is_ok() {
        Criterion::default()
            .sample_size(15)
            .measurement_time(Duration::from_secs(8))
            .warm_up_time(Duration::from_secs(2))
    } else {
        Criterion::default()
            .sample_size(50)
            .measurement_time(Duration::from_secs(15))
            .warm_up_time(Duration::from_secs(3))
    }
}

fn benchmark_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.sampling_mode(SamplingMode::Flat);
    group.throughput(Throughput::Elements(LINES as u64));

    let rt = tokio::runtime::Runtime::new().unwrap();

    for name in ["httpd", "default"] {
        let builder = TimelineBuilder::new(ParserRegistry::with_builtin().create(name));
        group.bench_function(name, |b| {
            b.iter(|| {
                rt.block_on(async { builder.build(ACCESS_LOG.as_bytes()).await.unwrap() })
            })
        });
    }

    group.finish();
}

fn benchmark_unthrottled_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let timeline = rt.block_on(async {
        TimelineBuilder::new(Parser::Httpd(HttpdParser))
            .build(ACCESS_LOG.as_bytes())
            .await
            .unwrap()
    });
    let scheduler = Scheduler::new(ReplayOptions::with_rate(0.0)).unwrap();

    let mut group = c.benchmark_group("replay");
    group.throughput(Throughput::Elements(timeline.len() as u64));

    group.bench_function("rate_zero", |b| {
        b.iter_batched(
            || NullSink { bytes: 0 },
            |mut sink| {
                rt.block_on(async {
                    scheduler
                        .replay(&timeline, &mut sink, "bench", &ReplayControl::new())
                        .await
                        .unwrap()
                })
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn benchmark_csv(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let timeline = rt.block_on(async {
        TimelineBuilder::new(Parser::Httpd(HttpdParser))
            .build(ACCESS_LOG.as_bytes())
            .await
            .unwrap()
    });

    let mut group = c.benchmark_group("csv");
    group.throughput(Throughput::Elements(timeline.len() as u64));

    group.bench_function("write_to_memory", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut out = Vec::with_capacity(1 << 20);
                CsvWriter::default().write_to(&mut out, &timeline).await.unwrap();
                out
            })
        })
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets = benchmark_parsing, benchmark_unthrottled_replay, benchmark_csv
}

criterion_main!(benches);
