//! End-to-end behaviour of the control loop against a scripted cloud
//!
//! Thresholds are high=60 / low=20 with the max metric throughout.

use pretty_assertions::assert_eq;
use server_autoscaler::{
    InstanceStatus,
    controller::{Autoscaler, StepOutcome},
    monitors::hysteresis::ThresholdCounters,
};

use crate::helpers::*;

async fn feed(autoscaler: &mut Autoscaler, count: usize) -> Vec<StepOutcome> {
    let mut outcomes = vec![];
    for _ in 0..count {
        outcomes.push(autoscaler.step().await.unwrap());
    }
    outcomes
}

#[tokio::test]
async fn test_sustained_high_load_requests_one_clone() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[Some(70.0), Some(65.0), Some(80.0)]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    let outcomes = feed(&mut autoscaler, 3).await;

    assert_eq!(
        outcomes,
        vec![
            StepOutcome::Held { value: 70.0 },
            StepOutcome::Held { value: 65.0 },
            StepOutcome::CloneRequested {
                clone: "base_clone".to_string()
            },
        ]
    );
    assert_eq!(cloud.actions(), vec![Action::Create("base_clone".to_string())]);
    assert_eq!(autoscaler.target().name, BASE);
    assert_eq!(autoscaler.target().counters, ThresholdCounters::default());
}

#[tokio::test]
async fn test_sustained_low_load_hands_over_to_clone() {
    let cloud = FakeCloud::with_base();
    cloud.add("base_clone", InstanceStatus::Active, Some("10.20.20.11"));
    let exec = ScriptedExec::with_samples(&[Some(10.0), Some(15.0), Some(18.0), Some(40.0)]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    let outcomes = feed(&mut autoscaler, 3).await;

    assert_eq!(
        outcomes[2],
        StepOutcome::HandedOver {
            from: BASE.to_string(),
            to: "base_clone".to_string()
        }
    );
    assert_eq!(
        cloud.actions(),
        vec![Action::Teardown {
            name: BASE.to_string(),
            wipe_snapshots: true
        }]
    );
    assert_eq!(autoscaler.target().name, "base_clone");
    assert!(autoscaler.target().counters.is_idle());
    assert_eq!(cloud.names(), vec!["base_clone"]);

    // the next cycle samples the clone
    autoscaler.step().await.unwrap();
    assert_eq!(
        exec.sampled_addresses().last().copied(),
        Some("10.20.20.11".parse().unwrap())
    );
}

#[tokio::test]
async fn test_dead_band_sample_delays_scale_up() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[
        Some(70.0),
        Some(45.0),
        Some(70.0),
        Some(70.0),
        Some(70.0),
    ]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    let mut highs = vec![];
    for _ in 0..4 {
        let outcome = autoscaler.step().await.unwrap();
        assert!(matches!(outcome, StepOutcome::Held { .. }));
        highs.push(autoscaler.target().counters.consecutive_high);
    }
    assert_eq!(highs, vec![1, 0, 1, 2]);
    assert!(cloud.actions().is_empty());

    let outcome = autoscaler.step().await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::CloneRequested {
            clone: "base_clone".to_string()
        }
    );
}

#[tokio::test]
async fn test_no_second_clone_while_one_is_live() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[Some(90.0); 6]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    let outcomes = feed(&mut autoscaler, 6).await;

    assert_eq!(
        outcomes[2],
        StepOutcome::CloneRequested {
            clone: "base_clone".to_string()
        }
    );
    assert_eq!(
        outcomes[5],
        StepOutcome::CloneAlreadyPresent {
            clone: "base_clone".to_string()
        }
    );
    assert_eq!(cloud.actions(), vec![Action::Create("base_clone".to_string())]);
}

#[tokio::test]
async fn test_clone_still_building_blocks_scale_up() {
    let cloud = FakeCloud::with_base();
    cloud.add("base_clone", InstanceStatus::Other("BUILD".to_string()), None);
    let exec = ScriptedExec::with_samples(&[Some(90.0); 3]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    let outcomes = feed(&mut autoscaler, 3).await;

    assert!(matches!(outcomes[2], StepOutcome::CloneAlreadyPresent { .. }));
    assert!(cloud.actions().is_empty());
}

#[tokio::test]
async fn test_failed_clone_does_not_block_scale_up() {
    let cloud = FakeCloud::with_base();
    cloud.add("base_clone", InstanceStatus::Error, None);
    let exec = ScriptedExec::with_samples(&[Some(90.0); 3]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    let outcomes = feed(&mut autoscaler, 3).await;

    assert!(matches!(outcomes[2], StepOutcome::CloneRequested { .. }));
}

#[tokio::test]
async fn test_last_live_instance_is_never_deleted() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[Some(5.0); 3]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 3)).await;

    let outcomes = feed(&mut autoscaler, 3).await;

    assert_eq!(outcomes[2], StepOutcome::LastInstanceKept);
    assert!(cloud.actions().is_empty());
    assert_eq!(autoscaler.target().name, BASE);
    assert!(autoscaler.target().counters.is_idle());
}

#[tokio::test]
async fn test_handover_picks_highest_ordered_live_clone() {
    let cloud = FakeCloud::with_base();
    cloud.add("base_clone_2", InstanceStatus::Active, Some("10.20.20.12"));
    cloud.add("base_clone", InstanceStatus::Active, Some("10.20.20.11"));
    cloud.add("base_clone_1", InstanceStatus::Active, Some("10.20.20.13"));
    cloud.add("base_clone_3", InstanceStatus::Error, Some("10.20.20.14"));
    let exec = ScriptedExec::with_samples(&[Some(5.0)]);
    let mut autoscaler = start(&cloud, &exec, &test_config(3, 1)).await;

    let outcome = autoscaler.step().await.unwrap();

    assert_eq!(
        outcome,
        StepOutcome::HandedOver {
            from: BASE.to_string(),
            to: "base_clone_2".to_string()
        }
    );
    assert_eq!(
        autoscaler.target().address,
        "10.20.20.12".parse::<std::net::IpAddr>().unwrap()
    );
}

#[tokio::test]
async fn test_numbered_clone_from_tool_is_recognized() {
    let cloud = FakeCloud {
        tool_suffix: Some(1),
        ..FakeCloud::with_base()
    };
    let exec = ScriptedExec::with_samples(&[Some(90.0), Some(90.0), Some(5.0), Some(5.0)]);
    let mut autoscaler = start(&cloud, &exec, &test_config(2, 2)).await;

    let outcomes = feed(&mut autoscaler, 4).await;

    assert_eq!(
        outcomes[1],
        StepOutcome::CloneRequested {
            clone: "base_clone".to_string()
        }
    );
    assert_eq!(
        outcomes[3],
        StepOutcome::HandedOver {
            from: BASE.to_string(),
            to: "base_clone_1".to_string()
        }
    );
}

#[tokio::test]
async fn test_full_scale_out_and_handover_cycle() {
    let cloud = FakeCloud::with_base();
    let exec = ScriptedExec::with_samples(&[
        Some(75.0),
        Some(82.0),
        Some(50.0),
        Some(12.0),
        Some(8.0),
        Some(90.0),
        Some(90.0),
    ]);
    let mut autoscaler = start(&cloud, &exec, &test_config(2, 2)).await;

    let outcomes = feed(&mut autoscaler, 7).await;

    assert_eq!(
        outcomes,
        vec![
            StepOutcome::Held { value: 75.0 },
            StepOutcome::CloneRequested {
                clone: "base_clone".to_string()
            },
            StepOutcome::Held { value: 50.0 },
            StepOutcome::Held { value: 12.0 },
            StepOutcome::HandedOver {
                from: BASE.to_string(),
                to: "base_clone".to_string()
            },
            StepOutcome::Held { value: 90.0 },
            // the clone is now the base of its own family
            StepOutcome::CloneRequested {
                clone: "base_clone_clone".to_string()
            },
        ]
    );

    let sampled = exec.sampled_addresses();
    assert_eq!(sampled[0], BASE_ADDR.parse::<std::net::IpAddr>().unwrap());
    assert_ne!(sampled[5], sampled[0]);
    assert_eq!(cloud.names(), vec!["base_clone", "base_clone_clone"]);
}

#[tokio::test]
async fn test_snapshots_kept_when_configured() {
    let cloud = FakeCloud::with_base();
    cloud.add("base_clone", InstanceStatus::Active, Some("10.20.20.11"));
    let exec = ScriptedExec::with_samples(&[Some(5.0)]);
    let mut config = test_config(3, 1);
    config.provision.wipe_snapshots = false;
    let mut autoscaler = start(&cloud, &exec, &config).await;

    autoscaler.step().await.unwrap();

    assert_eq!(
        cloud.actions(),
        vec![Action::Teardown {
            name: BASE.to_string(),
            wipe_snapshots: false
        }]
    );
}
