use std::time::Duration;

use assert_matches::assert_matches;
use server_autoscaler::{
    InstanceStatus,
    controller::{Autoscaler, StepOutcome},
    error::FatalError,
};
use tokio::sync::watch;

use crate::helpers::*;

#[tokio::test]
async fn test_failed_sample_leaves_counters_untouched() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[Some(70.0), None, Some(70.0), Some(70.0)]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    assert_matches!(autoscaler.step().await, Ok(StepOutcome::Held { .. }));
    assert_eq!(autoscaler.step().await.unwrap(), StepOutcome::SampleSkipped);
    assert_eq!(autoscaler.target().counters.consecutive_high, 1);

    assert_matches!(autoscaler.step().await, Ok(StepOutcome::Held { .. }));
    assert_matches!(
        autoscaler.step().await,
        Ok(StepOutcome::CloneRequested { .. })
    );
}

#[tokio::test]
async fn test_unreachable_target_never_scales() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::default();
    let mut autoscaler = start(&cloud, &exec, &test_config(1, 1)).await;

    for _ in 0..5 {
        assert_eq!(autoscaler.step().await.unwrap(), StepOutcome::SampleSkipped);
    }
    assert!(cloud.actions().is_empty());
    assert!(autoscaler.target().counters.is_idle());
}

#[tokio::test]
async fn test_failed_clone_creation_resets_and_retries_after_full_run() {
    let cloud = FakeCloud {
        fail_create: true,
        ..FakeCloud::with_base()
    };
    let exec = ScriptedExec::with_samples(&[Some(90.0); 4]);
    let mut autoscaler = start(&cloud, &exec, &test_config(2, 2)).await;

    autoscaler.step().await.unwrap();
    assert_eq!(autoscaler.step().await.unwrap(), StepOutcome::ActionFailed);
    assert!(autoscaler.target().counters.is_idle());
    assert_eq!(autoscaler.target().name, BASE);

    // one more high sample is not enough to retry
    assert_matches!(autoscaler.step().await, Ok(StepOutcome::Held { .. }));
    assert_eq!(autoscaler.step().await.unwrap(), StepOutcome::ActionFailed);
    assert_eq!(cloud.actions().len(), 2);
}

#[tokio::test]
async fn test_failed_teardown_keeps_target() {
    let cloud = FakeCloud {
        fail_teardown: true,
        ..FakeCloud::with_base()
    };
    cloud.add("base_clone", InstanceStatus::Active, Some("10.20.20.11"));
    let exec = ScriptedExec::with_samples(&[Some(5.0)]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 1)).await;

    assert_eq!(autoscaler.step().await.unwrap(), StepOutcome::ActionFailed);
    assert_eq!(autoscaler.target().name, BASE);
    assert_eq!(cloud.names(), vec![BASE, "base_clone"]);
}

#[tokio::test]
async fn test_listing_failure_skips_action() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[Some(90.0), Some(5.0)]);
    let mut autoscaler = start(&cloud, &exec, &test_config(1, 1)).await;
    cloud.set_listing_fails(true);

    assert_eq!(autoscaler.step().await.unwrap(), StepOutcome::ActionFailed);
    assert_eq!(autoscaler.step().await.unwrap(), StepOutcome::ActionFailed);
    assert!(cloud.actions().is_empty());
}

#[tokio::test]
async fn test_handover_to_clone_without_address_is_fatal() {
    let cloud = FakeCloud::with_base();
    cloud.add("base_clone", InstanceStatus::Active, None);
    let exec = ScriptedExec::with_samples(&[Some(5.0)]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 1)).await;

    assert_matches!(
        autoscaler.step().await,
        Err(FatalError::HandoverUnresolved { to, .. }) if to == "base_clone"
    );
    // the old target is already gone at this point
    assert_eq!(cloud.names(), vec!["base_clone"]);
}

#[tokio::test]
async fn test_start_fails_for_unknown_target() {
    let cloud = FakeCloud::new();
    let exec = ScriptedExec::default();

    let result = Autoscaler::start(&test_config(3, 3), BASE, collaborators(&cloud, &exec)).await;
    assert_matches!(result, Err(FatalError::TargetNotFound(_)));
}

#[tokio::test]
async fn test_start_fails_without_address() {
    let cloud = FakeCloud::new();
    cloud.add(BASE, InstanceStatus::Active, None);
    let exec = ScriptedExec::default();

    let result = Autoscaler::start(&test_config(3, 3), BASE, collaborators(&cloud, &exec)).await;
    assert_matches!(result, Err(FatalError::NoPublicAddress(_)));
}

#[tokio::test]
async fn test_start_uses_address_override() {
    let cloud = FakeCloud::new();
    cloud.add(BASE, InstanceStatus::Active, None);
    let exec = ScriptedExec::default();
    let mut config = test_config(3, 3);
    config.address = Some("192.168.1.5".parse().unwrap());

    let autoscaler = Autoscaler::start(&config, BASE, collaborators(&cloud, &exec))
        .await
        .unwrap();
    assert_eq!(autoscaler.target().address, config.address.unwrap());
}

#[tokio::test]
async fn test_run_returns_when_already_shut_down() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[Some(90.0)]);
    let autoscaler = start(&cloud, &exec, &test_config(1, 1)).await;

    let (_tx, rx) = watch::channel(true);
    let result = tokio::time::timeout(Duration::from_secs(5), autoscaler.run(rx)).await;

    assert_matches!(result, Ok(Ok(())));
    assert!(exec.sampled_addresses().is_empty());
    assert!(cloud.actions().is_empty());
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[Some(40.0)]);
    let autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(autoscaler.run(rx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert_matches!(result, Ok(Ok(Ok(()))));
    assert_eq!(exec.sampled_addresses().len(), 1);
}

#[tokio::test]
async fn test_run_propagates_fatal_handover() {
    let cloud = FakeCloud::with_base();
    cloud.add("base_clone", InstanceStatus::Active, None);
    let exec = ScriptedExec::with_samples(&[Some(5.0)]);
    let autoscaler = start(&cloud, &exec, &test_config(3, 1)).await;

    let (_tx, rx) = watch::channel(false);
    let result = tokio::time::timeout(Duration::from_secs(5), autoscaler.run(rx)).await;

    assert_matches!(result, Ok(Err(FatalError::HandoverUnresolved { .. })));
}
