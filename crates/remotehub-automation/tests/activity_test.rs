//! Activity orchestrator tests.
//!
//! Tests cover:
//! - Ascending step order regardless of storage order
//! - Required-step abort and optional-step continuation
//! - Lifecycle events and `last_used` write-back
//! - Reordering, cancellation and the per-activity run lock

mod common;

use std::time::Duration;

use common::{activity_events, fixture, ir_device};
use remotehub_automation::{AutomationError, RunOutcome};
use remotehub_core::model::*;
use remotehub_core::{HubEvent, HubStore};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_movie_night_aborts_when_receiver_fails() {
    let f = fixture();
    let tv = ir_device(&f.store, 1, "TV", "Power", CommandType::Power);
    let receiver = ir_device(&f.store, 2, "Receiver", "HDMI1", CommandType::Input);
    let soundbar = ir_device(&f.store, 3, "Soundbar", "Volume Up", CommandType::VolumeUp);
    f.store
        .save_activity(
            &Activity::new(1, "Movie Night")
                .with_step(ActivityStep::new(11, 1, tv, 1).with_delays(0, 500))
                .with_step(ActivityStep::new(12, 1, receiver, 2))
                .with_step(ActivityStep::new(13, 1, soundbar, 3).optional()),
        )
        .unwrap();
    f.ir.fail_device(2);
    let mut rx = f.hub.event_bus().subscribe();

    let started = tokio::time::Instant::now();
    let report = f
        .hub
        .run_activity(1, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(!report.succeeded());
    assert!(matches!(
        report.outcome,
        RunOutcome::Aborted {
            step_id: 12,
            step_order: 2,
            ..
        }
    ));
    assert_eq!(report.executed_orders(), vec![1, 2]);
    // The soundbar never received anything.
    assert_eq!(f.ir.sent_devices(), vec![1]);

    let events = activity_events(rx.drain());
    assert!(matches!(events.first(), Some(HubEvent::ActivityStarted { activity_id: 1, .. })));
    match events.last() {
        Some(HubEvent::ActivityCompleted {
            success,
            failed_step,
            reason,
            ..
        }) => {
            assert!(!success);
            assert_eq!(*failed_step, Some(12));
            assert!(reason.as_deref().unwrap().contains("did not acknowledge"));
        }
        other => panic!("unexpected last event {:?}", other),
    }
    let step_events = events
        .iter()
        .filter(|e| matches!(e, HubEvent::ActivityStepExecuted { .. }))
        .count();
    assert_eq!(step_events, 2);

    assert!(f.store.get_activity(1).unwrap().unwrap().last_used.is_none());
}

#[tokio::test]
async fn test_optional_failure_does_not_abort() {
    let f = fixture();
    let flaky = ir_device(&f.store, 1, "Lamp", "Power", CommandType::Power);
    let tv = ir_device(&f.store, 2, "TV", "Power", CommandType::Power);
    f.store
        .save_activity(
            &Activity::new(1, "Lights Off")
                .with_step(ActivityStep::new(1, 1, flaky, 1).optional())
                .with_step(ActivityStep::new(2, 1, tv, 2)),
        )
        .unwrap();
    f.ir.fail_device(1);

    let report = f
        .hub
        .run_activity(1, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.steps.len(), 2);
    assert!(!report.steps[0].success);
    assert!(report.steps[0].reason.is_some());
    assert!(report.steps[1].success);
    assert!(f.store.get_activity(1).unwrap().unwrap().last_used.is_some());
}

#[tokio::test]
async fn test_steps_run_in_ascending_order_and_abort() {
    let f = fixture();
    let a = ir_device(&f.store, 1, "A", "Power", CommandType::Power);
    let b = ir_device(&f.store, 2, "B", "Power", CommandType::Power);
    let c = ir_device(&f.store, 3, "C", "Power", CommandType::Power);
    // Stored out of order on purpose.
    f.store
        .save_activity(
            &Activity::new(1, "Ordered")
                .with_step(ActivityStep::new(1, 1, b, 2))
                .with_step(ActivityStep::new(2, 1, a, 1))
                .with_step(ActivityStep::new(3, 1, c, 3)),
        )
        .unwrap();
    f.ir.fail_device(2);

    let report = f
        .hub
        .run_activity(1, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.executed_orders(), vec![1, 2]);
    assert!(matches!(report.outcome, RunOutcome::Aborted { step_order: 2, .. }));
    assert_eq!(f.ir.sent_devices(), vec![1]);
}

#[tokio::test]
async fn test_reorder_changes_execution_order() {
    let f = fixture();
    for id in 1..=3 {
        ir_device(&f.store, id, "Device", "Power", CommandType::Power);
    }
    f.store
        .save_activity(
            &Activity::new(1, "Reordered")
                .with_step(ActivityStep::new(1, 1, 101, 3))
                .with_step(ActivityStep::new(2, 1, 102, 1))
                .with_step(ActivityStep::new(3, 1, 103, 2)),
        )
        .unwrap();

    let cancel = CancellationToken::new();
    f.hub.run_activity(1, &cancel).await.unwrap();
    assert_eq!(f.ir.sent_devices(), vec![2, 3, 1]);

    f.store.reorder_activity_steps(1, &[1, 2, 3]).unwrap();
    f.hub.run_activity(1, &cancel).await.unwrap();
    assert_eq!(f.ir.sent_devices()[3..], [1, 2, 3]);
}

#[tokio::test]
async fn test_missing_command_is_a_step_failure() {
    let f = fixture();
    let tv = ir_device(&f.store, 1, "TV", "Power", CommandType::Power);
    f.store
        .save_activity(
            &Activity::new(1, "Broken")
                .with_step(ActivityStep::new(1, 1, 999, 1).optional())
                .with_step(ActivityStep::new(2, 1, tv, 2)),
        )
        .unwrap();
    f.store
        .save_activity(&Activity::new(2, "Required broken").with_step(ActivityStep::new(3, 2, 999, 1)))
        .unwrap();

    let cancel = CancellationToken::new();
    let report = f.hub.run_activity(1, &cancel).await.unwrap();
    assert!(report.succeeded());
    assert!(report.steps[0].reason.as_deref().unwrap().contains("command 999"));

    let report = f.hub.run_activity(2, &cancel).await.unwrap();
    match report.outcome {
        RunOutcome::Aborted { reason, .. } => assert!(reason.contains("command 999")),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_and_disabled_activities() {
    let f = fixture();
    let cancel = CancellationToken::new();
    assert_eq!(
        f.hub.run_activity(42, &cancel).await.unwrap_err(),
        AutomationError::NotFound(42)
    );

    let mut activity = Activity::new(1, "Off");
    activity.enabled = false;
    f.store.save_activity(&activity).unwrap();
    assert_eq!(
        f.hub.run_activity(1, &cancel).await.unwrap_err(),
        AutomationError::Disabled(1)
    );
}

#[tokio::test]
async fn test_cancelled_before_first_step() {
    let f = fixture();
    let tv = ir_device(&f.store, 1, "TV", "Power", CommandType::Power);
    f.store
        .save_activity(&Activity::new(1, "Watch").with_step(ActivityStep::new(1, 1, tv, 1)))
        .unwrap();
    let mut rx = f.hub.event_bus().subscribe();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = f.hub.run_activity(1, &cancel).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(report.steps.is_empty());
    assert!(f.ir.sent().is_empty());
    assert!(activity_events(rx.drain()).iter().any(|e| matches!(
        e,
        HubEvent::ActivityCompleted { success: false, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_delay() {
    let f = fixture();
    let tv = ir_device(&f.store, 1, "TV", "Power", CommandType::Power);
    let receiver = ir_device(&f.store, 2, "Receiver", "Power", CommandType::Power);
    f.store
        .save_activity(
            &Activity::new(1, "Slow")
                .with_step(ActivityStep::new(1, 1, tv, 1).with_delays(0, 60_000))
                .with_step(ActivityStep::new(2, 1, receiver, 2)),
        )
        .unwrap();

    let cancel = CancellationToken::new();
    let run = {
        let hub = f.hub.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { hub.run_activity(1, &cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.executed_orders(), vec![1]);
    assert_eq!(f.ir.sent_devices(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_run_of_same_activity_is_rejected() {
    let f = fixture();
    let tv = ir_device(&f.store, 1, "TV", "Power", CommandType::Power);
    f.store
        .save_activity(
            &Activity::new(1, "Long").with_step(ActivityStep::new(1, 1, tv, 1).with_delays(0, 10_000)),
        )
        .unwrap();

    let first = {
        let hub = f.hub.clone();
        tokio::spawn(async move { hub.run_activity(1, &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(f.hub.orchestrator().is_running(1));

    assert_eq!(
        f.hub
            .run_activity(1, &CancellationToken::new())
            .await
            .unwrap_err(),
        AutomationError::AlreadyRunning(1)
    );

    assert!(first.await.unwrap().unwrap().succeeded());
    assert!(!f.hub.orchestrator().is_running(1));
    assert!(f
        .hub
        .run_activity(1, &CancellationToken::new())
        .await
        .unwrap()
        .succeeded());
}
