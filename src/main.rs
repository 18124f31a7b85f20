//! Resilient Collector
//!
//! Runs the simple aggregator behind a circuit breaker, fed by a built-in
//! generator that emits one `work_done` point per unit of work.
//!
//! The exporter breaker counts a send dropped at the aggregator's send
//! timeout as a failure, whatever `breaker.count_cancellation_as_failure`
//! says.
//!
//! ## Usage
//!
//! ```text
//! resilient-collector [CONFIG.toml]
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | COLLECTOR_CONFIG | - | Config path when no argument is given |
//! | COLLECTOR_FLUSH_INTERVAL_MS | 5000 | Aggregator flush interval |
//! | COLLECTOR_CHECKPOINT_FILE | - | Local checkpoint file |
//! | COLLECTOR_STORAGE | - | Storage extension id |
//! | COLLECTOR_LOG_FORMAT | text | `text` or `json` |
//! | COLLECTOR_DEMO_BATCH | 100 | Points per generated batch |
//! | RUST_LOG | info | Log filter |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use resilient_collector::consumer::LoggingConsumer;
use resilient_collector::pdata::{Attributes, Metric, NumberDataPoint, Scope, Temporality};
use resilient_collector::{
    Aggregator, CollectorConfig, ComponentId, MetricsBatch, MetricsConsumer, ProductionClock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_DEMO_BATCH: u32 = 100;
const DEMO_PERIOD: Duration = Duration::from_secs(1);
const WORK_TYPES: [&str; 3] = ["manual", "scheduled", "retry"];

fn load_config() -> Result<CollectorConfig, Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("COLLECTOR_CONFIG").ok());
    let mut config = match path {
        Some(path) => CollectorConfig::load(path)?,
        None => CollectorConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// One point per unit of work, each carrying a unique `work.id`
fn demo_batch(round: u64, size: u32) -> MetricsBatch {
    let points = (0..size)
        .map(|i| {
            let work_type = WORK_TYPES[i as usize % WORK_TYPES.len()];
            let attrs = Attributes::new()
                .with("work.type", work_type)
                .with("work.id", format!("{}-{}", round, i));
            NumberDataPoint::int(attrs, 1)
        })
        .collect();
    MetricsBatch::single(
        Attributes::new().with("service.name", "demo-worker"),
        Scope::default(),
        vec![Metric::sum("work_done", Temporality::Delta, points)],
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    resilient_collector::observability::init_logging(&config.logging)?;

    let mut host = config.build_host()?;
    let breaker = config.exporter_breaker("exporter");
    host.add_extension(ComponentId::new("circuit_breaker"), breaker.as_extension());

    let next: Arc<dyn MetricsConsumer> = Arc::new(breaker.guard_consumer(LoggingConsumer));
    let aggregator = Arc::new(Aggregator::new(
        config.aggregator.clone(),
        next,
        Arc::new(ProductionClock::new()),
    ));
    aggregator.start(&host).await?;

    let batch_size = std::env::var("COLLECTOR_DEMO_BATCH")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_DEMO_BATCH);

    let generator = {
        let aggregator = aggregator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DEMO_PERIOD);
            let mut round = 0u64;
            loop {
                ticker.tick().await;
                let stats = aggregator.ingest(&demo_batch(round, batch_size));
                tracing::debug!(round, accepted = stats.accepted, "generated work batch");
                round += 1;
            }
        })
    };

    info!(
        flush_interval_ms = config.aggregator.flush_interval.as_millis() as u64,
        batch_size,
        "collector running; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    generator.abort();
    if let Err(e) = aggregator.shutdown().await {
        error!(error = %e, "failed to close checkpoint store");
    }
    Ok(())
}
