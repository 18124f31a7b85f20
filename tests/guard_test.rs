//! Guard integration tests
//!
//! One breaker extension guarding several call sites, and the aggregator
//! exporting through a guarded consumer.

use futures::future::BoxFuture;
use resilient_collector::aggregator::{Aggregator, AggregatorConfig, CheckpointStatus, SendStatus};
use resilient_collector::breaker::{BreakerError, BreakerExtension, Settings, State};
use resilient_collector::clock::{SimulatedClock, Timestamp};
use resilient_collector::consumer::{CapturingConsumer, ConsumerError, MetricsConsumer};
use resilient_collector::guard::{
    GuardError, HttpResponse, RoundTrip, RpcCode, RpcStatus, UnaryInvoker,
};
use resilient_collector::pdata::{Attributes, Metric, MetricsBatch, NumberDataPoint, Scope, Temporality};
use resilient_collector::storage::MemoryStorageExtension;
use resilient_collector::{CollectorConfig, ComponentId, Extension, Host};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct Reply(u16);

impl HttpResponse for Reply {
    fn status(&self) -> u16 {
        self.0
    }
}

/// Backend that is either healthy (200) or down (503)
#[derive(Default)]
struct Backend {
    down: AtomicBool,
    calls: AtomicUsize,
}

impl RoundTrip for Backend {
    type Request = &'static str;
    type Response = Reply;
    type Error = std::io::Error;

    fn round_trip(&self, _request: &'static str) -> BoxFuture<'_, Result<Reply, std::io::Error>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Ok(Reply(503))
            } else {
                Ok(Reply(200))
            }
        })
    }
}

impl UnaryInvoker for Backend {
    type Request = ();
    type Response = ();

    fn invoke<'a>(&'a self, _method: &'a str, _request: ()) -> BoxFuture<'a, Result<(), RpcStatus>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(RpcStatus::new(RpcCode::Unavailable, "backend down"))
            } else {
                Ok(())
            }
        })
    }
}

fn extension(clock: &SimulatedClock) -> BreakerExtension {
    BreakerExtension::from_settings(
        Settings::new("export")
            .with_timeout(Duration::from_secs(30))
            .with_clock(Arc::new(clock.clone())),
    )
}

#[tokio::test]
async fn test_http_breaker_opens_and_recovers() {
    let clock = SimulatedClock::new(Timestamp::ZERO);
    let ext = extension(&clock);
    let backend = Backend::default();
    backend.down.store(true, Ordering::SeqCst);
    let client = ext.round_tripper(backend);

    for _ in 0..6 {
        assert!(matches!(client.round_trip("GET /").await, Err(GuardError::Status(503))));
    }
    let err = client.round_trip("GET /").await.unwrap_err();
    assert!(err.is_breaker_open());
    assert_eq!(client.inner().calls.load(Ordering::SeqCst), 6);

    client.inner().down.store(false, Ordering::SeqCst);
    clock.advance(Duration::from_secs(30));
    let reply = client.round_trip("GET /").await.unwrap();
    assert_eq!(reply.status(), 200);
    assert_eq!(ext.breaker().state(), State::Closed);
}

#[tokio::test]
async fn test_http_and_rpc_guards_share_one_breaker() {
    let clock = SimulatedClock::new(Timestamp::ZERO);
    let ext = extension(&clock);
    let http = ext.round_tripper(Backend::default());
    let rpc_backend = Backend::default();
    rpc_backend.down.store(true, Ordering::SeqCst);
    let interceptor = ext.interceptor();

    for _ in 0..6 {
        let status = interceptor.unary(&rpc_backend, "/export", ()).await.unwrap_err();
        assert_eq!(status.code, RpcCode::Unavailable);
    }

    // Tripped by RPC failures, the HTTP path is refused too
    let err = http.round_trip("POST /v1/metrics").await.unwrap_err();
    assert!(matches!(err, GuardError::BreakerOpen(BreakerError::Open)));
    assert_eq!(http.inner().calls.load(Ordering::SeqCst), 0);

    let status = interceptor.unary(&rpc_backend, "/export", ()).await.unwrap_err();
    assert_eq!(status.code, RpcCode::Unavailable);
    assert_eq!(status.message, "circuit breaker is open: circuit breaker is open");
    assert_eq!(rpc_backend.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_breaker_resolved_from_host() {
    let clock = SimulatedClock::new(Timestamp::ZERO);
    let ext = extension(&clock);
    let host = Host::new().with_extension(ComponentId::new("circuit_breaker"), ext.as_extension());

    let breaker = host.circuit_breaker(&ComponentId::new("circuit_breaker")).unwrap();
    assert!(Arc::ptr_eq(&breaker, &ext.breaker()));
    assert!(host.storage(&ComponentId::new("circuit_breaker")).is_err());
}

fn work_batch(n: u32) -> MetricsBatch {
    let points = (0..n)
        .map(|i| {
            NumberDataPoint::int(
                Attributes::new()
                    .with("work.type", "manual")
                    .with("work.id", i.to_string()),
                1,
            )
        })
        .collect();
    MetricsBatch::single(
        Attributes::new(),
        Scope::default(),
        vec![Metric::sum("work_done", Temporality::Delta, points)],
    )
}

#[tokio::test]
async fn test_aggregator_exports_through_guarded_consumer() {
    let clock = SimulatedClock::new(Timestamp::from_millis(1_000));
    let ext = extension(&clock);
    let sink = CapturingConsumer::new();
    let next: Arc<dyn MetricsConsumer> = Arc::new(ext.guard_consumer(sink.clone()));

    let storage = MemoryStorageExtension::new();
    let host = Host::new().with_extension(
        ComponentId::new("memory"),
        Extension::Storage(Arc::new(storage.clone())),
    );
    let config = AggregatorConfig {
        storage: Some(ComponentId::new("memory")),
        ..Default::default()
    };
    let agg = Aggregator::new(config.clone(), next, Arc::new(clock.clone()));
    agg.start(&host).await.unwrap();
    agg.ingest(&work_batch(10));

    sink.set_failing(true);
    for _ in 0..6 {
        let report = agg.flush().await;
        assert!(matches!(report.send, SendStatus::Failed(ConsumerError::Unavailable(_))));
    }
    assert_eq!(ext.breaker().state(), State::Open);

    // Refused without reaching the sink; the checkpoint is still written
    let sets_before = storage.store_for(&config.id).set_count();
    let report = agg.flush().await;
    assert!(matches!(report.checkpoint, CheckpointStatus::Saved));
    assert!(matches!(
        report.send,
        SendStatus::Failed(ConsumerError::BreakerOpen(BreakerError::Open))
    ));
    assert_eq!(sink.attempts(), 6);
    assert_eq!(storage.store_for(&config.id).set_count(), sets_before + 1);

    // Once the backend recovers the full cumulative total goes out
    sink.set_failing(false);
    clock.advance(Duration::from_secs(30));
    agg.ingest(&work_batch(5));
    let report = agg.flush().await;
    assert!(matches!(report.send, SendStatus::Sent));
    let batch = sink.last().unwrap();
    let point = &batch.metrics().next().unwrap().data.data_points()[0];
    assert_eq!(point.value.as_int(), Some(15));
    assert_eq!(point.start_time, Timestamp::from_millis(1_000));

    agg.shutdown().await.unwrap();
}

/// Downstream that never answers
#[derive(Default)]
struct StalledSink {
    calls: AtomicUsize,
}

impl MetricsConsumer for StalledSink {
    fn consume(&self, _batch: MetricsBatch) -> BoxFuture<'_, Result<(), ConsumerError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::pending().await
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_downstream_trips_exporter_breaker() {
    let config = CollectorConfig::from_toml_str(
        r#"
        [aggregator]
        send_timeout_ms = 1000

        [breaker]
        count_cancellation_as_failure = false
        "#,
    )
    .unwrap();
    let ext = config.exporter_breaker("exporter");
    assert!(ext.breaker().count_cancellation_as_failure());

    let stalled = Arc::new(StalledSink::default());
    let next: Arc<dyn MetricsConsumer> = Arc::new(ext.guard_consumer(stalled.clone()));
    let agg = Aggregator::new(
        config.aggregator.clone(),
        next,
        Arc::new(SimulatedClock::new(Timestamp::ZERO)),
    );
    agg.ingest(&work_batch(3));

    for _ in 0..6 {
        let report = agg.flush().await;
        assert!(matches!(report.send, SendStatus::Failed(ConsumerError::Timeout(_))));
    }
    assert_eq!(ext.breaker().state(), State::Open);

    let report = agg.flush().await;
    assert!(matches!(
        report.send,
        SendStatus::Failed(ConsumerError::BreakerOpen(BreakerError::Open))
    ));
    assert_eq!(stalled.calls.load(Ordering::SeqCst), 6);
}
