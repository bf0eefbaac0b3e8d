use std::time::Duration;

use dispatch_core::config::{DispatchConfig, RejectionPolicy};
use dispatch_core::error::ChannelError;
use dispatch_core::messages::{InboundMessage, RejectReason, RideReply, RideRequestMessage, TaxiNotice};
use dispatch_core::runner::Coordinator;
use dispatch_core::test_helpers::test_config;
use tokio::time;
use tokio_util::sync::CancellationToken;

fn fast_config(dir: &tempfile::TempDir) -> DispatchConfig {
    test_config(dir.path())
        .with_time_unit_ms(10)
        .with_snapshot_interval(20)
}

#[tokio::test(start_paused = true)]
async fn concurrent_requesters_share_one_taxi_fairly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (coordinator, handle) = Coordinator::new(fast_config(&dir)).expect("coordinator");
    let cancel = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(cancel.clone()));

    handle
        .publish_raw(br#"{"type":"position_update","taxi_id":1,"x":10,"y":10,"timestamp":0}"#)
        .await
        .expect("publish");

    let mut requests = Vec::new();
    for requester_id in 1..=5 {
        let handle = handle.clone();
        requests.push(tokio::spawn(async move {
            handle
                .request_ride(RideRequestMessage {
                    requester_id,
                    x: 10,
                    y: 12,
                })
                .await
        }));
    }

    let mut assigned = 0;
    let mut rejected = 0;
    for request in requests {
        match request.await.expect("join").expect("reply") {
            RideReply::Assigned { taxi_id: 1, .. } => assigned += 1,
            RideReply::Rejected {
                reason: RejectReason::NoTaxiAvailable,
            } => rejected += 1,
            other => panic!("unexpected reply {other:?}"),
        }
    }
    assert_eq!((assigned, rejected), (1, 4));

    cancel.cancel();
    let report = task.await.expect("join");
    assert_eq!(report.final_snapshot.counts.assigned, 1);
    assert_eq!(report.final_snapshot.counts.rejected, 4);
}

#[tokio::test(start_paused = true)]
async fn waiting_request_is_served_after_completion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fast_config(&dir).with_rejection_policy(RejectionPolicy::RetryUntilTimeout);
    let (coordinator, handle) = Coordinator::new(config).expect("coordinator");
    let cancel = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(cancel.clone()));
    let mut notices = handle.subscribe_notices();

    handle
        .publish(InboundMessage::PositionUpdate {
            taxi_id: 2,
            x: 0,
            y: 0,
            timestamp: 0,
            speed: Some(4),
        })
        .await
        .expect("publish");
    let first = handle
        .request_ride(RideRequestMessage {
            requester_id: 1,
            x: 4,
            y: 0,
        })
        .await
        .expect("reply");
    assert_eq!(
        first,
        RideReply::Assigned {
            taxi_id: 2,
            estimated_response_time: 1.0,
        }
    );
    assert!(matches!(
        notices.recv().await.expect("notice"),
        TaxiNotice::Dispatched { taxi_id: 2, .. }
    ));

    let waiter = {
        let handle = handle.clone();
        tokio::spawn(async move {
            handle
                .request_ride(RideRequestMessage {
                    requester_id: 2,
                    x: 8,
                    y: 0,
                })
                .await
        })
    };
    time::sleep(handle.clock().units(5)).await;
    assert!(!waiter.is_finished());

    handle
        .publish(InboundMessage::CompletionNotice {
            taxi_id: 2,
            timestamp: handle.now(),
        })
        .await
        .expect("publish");
    let second = waiter.await.expect("join").expect("reply");
    assert!(matches!(second, RideReply::Assigned { taxi_id: 2, .. }));

    cancel.cancel();
    task.await.expect("join");
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fast_config(&dir)
        .with_rejection_policy(RejectionPolicy::RetryUntilTimeout)
        .with_request_timeout(30);
    let (coordinator, handle) = Coordinator::new(config).expect("coordinator");
    let cancel = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(cancel.clone()));

    let reply = time::timeout(
        Duration::from_secs(5),
        handle.request_ride(RideRequestMessage {
            requester_id: 3,
            x: 1,
            y: 1,
        }),
    )
    .await
    .expect("reply before the test timeout")
    .expect("reply");
    assert_eq!(reply, RideReply::TimedOut);

    cancel.cancel();
    let report = task.await.expect("join");
    assert_eq!(report.final_snapshot.counts.timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn restart_picks_up_previous_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");

    let (coordinator, handle) = Coordinator::new(fast_config(&dir)).expect("coordinator");
    let cancel = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(cancel.clone()));
    handle
        .publish(InboundMessage::PositionUpdate {
            taxi_id: 8,
            x: 3,
            y: 4,
            timestamp: 0,
            speed: None,
        })
        .await
        .expect("publish");
    handle
        .request_ride(RideRequestMessage {
            requester_id: 1,
            x: 3,
            y: 5,
        })
        .await
        .expect("reply");
    time::sleep(Duration::from_millis(55)).await;
    cancel.cancel();
    let first = task.await.expect("join");

    let (coordinator, handle) = Coordinator::new(fast_config(&dir)).expect("coordinator");
    // The simulated clock picks up where the checkpoint left off.
    assert_eq!(handle.now(), first.final_snapshot.taken_at + 1);
    assert!(handle.now() >= 5);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(cancel.clone()));
    // Restored taxis are Free again and keep their last reported position.
    let reply = handle
        .request_ride(RideRequestMessage {
            requester_id: 2,
            x: 3,
            y: 3,
        })
        .await
        .expect("reply");
    assert!(matches!(reply, RideReply::Assigned { taxi_id: 8, .. }));

    cancel.cancel();
    let report = task.await.expect("join");
    assert_eq!(report.final_snapshot.counts.assigned, 2);
}

#[tokio::test(start_paused = true)]
async fn stopped_coordinator_reports_closed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (coordinator, handle) = Coordinator::new(fast_config(&dir)).expect("coordinator");
    let cancel = CancellationToken::new();
    let task = tokio::spawn(coordinator.run(cancel.clone()));
    cancel.cancel();
    task.await.expect("join");

    let result = handle
        .request_ride(RideRequestMessage {
            requester_id: 1,
            x: 0,
            y: 0,
        })
        .await;
    assert!(matches!(result, Err(ChannelError::Closed)));
}
