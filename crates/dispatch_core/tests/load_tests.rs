//! Load tests for dispatch_core: throughput of the dispatcher and coordinator under sustained traffic.

mod support;

use std::time::{Duration, Instant};

use dispatch_core::agents::{RequesterId, SpeedClass};
use dispatch_core::dispatcher::RideOutcome;
use dispatch_core::grid::GridPos;
use dispatch_core::messages::{InboundMessage, RideReply, RideRequestMessage};
use dispatch_core::runner::Coordinator;
use dispatch_core::test_helpers::test_config;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use support::TestDispatcherBuilder;
use tokio_util::sync::CancellationToken;

#[test]
#[ignore] // Only run explicitly: cargo test --package dispatch_core --test load_tests -- --ignored
fn test_sustained_dispatch() {
    let mut builder = TestDispatcherBuilder::new().with_config(|config| {
        config
            .with_shift_limit(None)
            .with_staleness_window(u64::MAX)
    });
    for taxi_id in 1..=1_000 {
        builder = builder.with_taxi(
            taxi_id,
            (taxi_id * 7) % 50,
            (taxi_id * 13) % 50,
            SpeedClass::ALL[(taxi_id % 3) as usize],
        );
    }
    let mut world = builder.build();
    let mut rng = StdRng::seed_from_u64(42);

    let start = Instant::now();
    let mut handled = 0u64;
    for now in 1..=20_000u64 {
        let pickup = GridPos::new(rng.gen_range(0..50), rng.gen_range(0..50));
        match world.dispatcher.request_ride(now as RequesterId, pickup, now) {
            RideOutcome::Replied(RideReply::Assigned { taxi_id, .. }) => {
                handled += 1;
                world.complete(taxi_id, now);
            }
            RideOutcome::Replied(_) => handled += 1,
            RideOutcome::Pending(_) => {}
        }
        world.dispatcher.tick(now);
    }
    let duration = start.elapsed();

    let per_sec = handled as f64 / duration.as_secs_f64();
    println!(
        "Sustained dispatch: {} requests in {:.2}s ({:.0} requests/sec)",
        handled,
        duration.as_secs_f64(),
        per_sec
    );
    assert_eq!(handled, 20_000);
    assert!(per_sec > 1_000.0, "Should handle >1000 requests/sec, got {per_sec:.0}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_concurrent_requesters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path())
        .with_time_unit_ms(1)
        .with_staleness_window(u64::MAX);
    let (coordinator, handle) = Coordinator::new(config).expect("coordinator");
    let cancel = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(cancel.clone()));

    for taxi_id in 1..=200u32 {
        handle
            .publish(InboundMessage::PositionUpdate {
                taxi_id,
                x: i64::from(taxi_id % 50),
                y: i64::from(taxi_id / 50),
                timestamp: 0,
                speed: None,
            })
            .await
            .expect("publish");
    }

    let start = Instant::now();
    let mut requests = Vec::new();
    for requester_id in 1..=2_000u32 {
        let handle = handle.clone();
        requests.push(tokio::spawn(async move {
            handle
                .request_ride(RideRequestMessage {
                    requester_id,
                    x: i64::from(requester_id % 50),
                    y: i64::from(requester_id % 37),
                })
                .await
        }));
    }
    let mut replies = 0;
    for request in requests {
        if tokio::time::timeout(Duration::from_secs(10), request)
            .await
            .is_ok_and(|joined| joined.is_ok_and(|reply| reply.is_ok()))
        {
            replies += 1;
        }
    }
    let duration = start.elapsed();
    println!(
        "Concurrent requesters: {} replies in {:.2}s",
        replies,
        duration.as_secs_f64()
    );

    cancel.cancel();
    let report = task.await.expect("join");
    assert_eq!(replies, 2_000);
    assert_eq!(report.final_snapshot.counts.assigned, 200);
    assert_eq!(report.final_snapshot.counts.rejected, 1_800);
}
