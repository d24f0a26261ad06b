//! Operation and subscription engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use evstore_client::operation::OperationRequest;
use evstore_client::operation_engine::{OperationEngine, OperationEngineConfig, OperationItem};
use evstore_client::subscription_engine::{SubscriptionEngine, SubscriptionItem};
use evstore_client::{
    ChannelListener, ConnectionId, EventData, ExpectedVersion, SubscriptionRecovery,
    SubscriptionTarget,
};
use evstore_protocol::message::{
    EventRecord, ResolvedEvent, StreamEventAppeared, SubscriptionConfirmation,
    WriteEventsCompleted,
};
use evstore_protocol::{Command, OperationResult, Package};
use std::time::{Duration, Instant};
use uuid::Uuid;

const CONN: ConnectionId = ConnectionId::new(1);

fn create_engine() -> OperationEngine {
    OperationEngine::new(OperationEngineConfig {
        max_retries: 10,
        timeout: Duration::from_secs(7),
        fail_on_no_server_response: false,
        rotate_correlation_on_retry: true,
    })
}

fn append_request() -> OperationRequest {
    OperationRequest::AppendToStream {
        stream: "order-1".to_string(),
        expected_version: ExpectedVersion::Any,
        events: vec![EventData::binary("OrderPlaced", b"{}".to_vec())],
        require_master: true,
    }
}

fn completed(correlation_id: Uuid) -> Package {
    Package::from_json(
        Command::WriteEventsCompleted,
        correlation_id,
        &WriteEventsCompleted {
            result: OperationResult::Success,
            message: None,
            first_event_number: 0,
            last_event_number: 0,
            prepare_position: Some(10),
            commit_position: Some(10),
            current_version: None,
        },
    )
    .unwrap()
}

fn bench_operation_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("operation_roundtrip");

    for in_flight in [1, 100, 1000] {
        group.throughput(Throughput::Elements(in_flight as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(in_flight),
            &in_flight,
            |b, &in_flight| {
                b.iter(|| {
                    let mut engine = create_engine();
                    let now = Instant::now();
                    let mut receivers = Vec::with_capacity(in_flight);
                    let mut responses = Vec::with_capacity(in_flight);
                    for _ in 0..in_flight {
                        let (item, rx) = OperationItem::new(append_request(), None);
                        let package = engine.schedule(item, CONN, now).unwrap();
                        responses.push(completed(package.correlation_id));
                        receivers.push(rx);
                    }
                    for response in &responses {
                        black_box(engine.handle(response, CONN, now));
                    }
                    black_box(receivers)
                });
            },
        );
    }

    group.finish();
}

fn bench_timeout_scan(c: &mut Criterion) {
    let mut engine = create_engine();
    let now = Instant::now();
    let mut receivers = Vec::new();
    for _ in 0..1000 {
        let (item, rx) = OperationItem::new(append_request(), None);
        engine.schedule(item, CONN, now);
        receivers.push(rx);
    }

    c.bench_function("timeout_scan_1000_pending", |b| {
        b.iter(|| black_box(engine.check_timeouts(now)));
    });
}

fn bench_subscription_delivery(c: &mut Criterion) {
    let mut engine = SubscriptionEngine::new(SubscriptionRecovery::Drop, 10);
    let (listener, mut events) = ChannelListener::new();
    let (item, _confirmation) =
        SubscriptionItem::new(SubscriptionTarget::All, false, Box::new(listener), None);
    let correlation_id = engine.schedule(item, CONN).unwrap().correlation_id;

    let confirmation = SubscriptionConfirmation {
        last_commit_position: 0,
        last_event_number: None,
    };
    engine.handle(
        &Package::from_json(
            Command::SubscriptionConfirmation,
            correlation_id,
            &confirmation,
        )
        .unwrap(),
        CONN,
    );

    let appeared = Package::from_json(
        Command::StreamEventAppeared,
        correlation_id,
        &StreamEventAppeared {
            event: ResolvedEvent {
                event: Some(EventRecord {
                    event_stream_id: "order-1".to_string(),
                    event_number: 0,
                    event_id: Uuid::new_v4(),
                    event_type: "OrderPlaced".to_string(),
                    data_content_type: 1,
                    metadata_content_type: 0,
                    data: b"{\"id\":1}".to_vec(),
                    metadata: vec![],
                    created: None,
                }),
                link: None,
                commit_position: 10,
                prepare_position: 10,
            },
        },
    )
    .unwrap();

    c.bench_function("subscription_event_delivery", |b| {
        b.iter(|| {
            black_box(engine.handle(&appeared, CONN));
            black_box(events.try_recv().ok())
        });
    });
}

criterion_group!(
    benches,
    bench_operation_roundtrip,
    bench_timeout_scan,
    bench_subscription_delivery,
);

criterion_main!(benches);
