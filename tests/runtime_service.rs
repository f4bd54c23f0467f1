// tests/runtime_service.rs

mod common;

use std::time::Duration;

use fleetsched::engine::{FleetService, RuntimeEvent};
use fleetsched::store::FleetStore;
use fleetsched::types::{CampaignStatus, TaskStatus};
use fleetsched_test_utils::builders::test_settings;
use fleetsched_test_utils::{CampaignBuilder, TestFleet};

use common::{claimed, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn start_event_generates_tasks_and_shutdown_stops_the_loop() -> TestResult {
    init_tracing();
    let harness = TestFleet::new(test_settings(100));
    let service = FleetService::start(harness.fleet.clone());

    let campaign = harness
        .fleet
        .coordinator
        .create_campaign(&CampaignBuilder::new("svc").attack("a", 1000, &[]).build())
        .await?;
    service.send(RuntimeEvent::StartCampaign(campaign.id)).await?;

    with_timeout(async {
        while harness.store.task_count() < 10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let stored = harness.store.campaign(campaign.id).await?.unwrap();
    assert_eq!(stored.status, CampaignStatus::Running);

    with_timeout(service.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn rejected_campaign_does_not_stop_the_loop() -> TestResult {
    let harness = TestFleet::new(test_settings(100));
    let service = FleetService::start(harness.fleet.clone());
    let coordinator = &harness.fleet.coordinator;

    let bad = coordinator
        .create_campaign(&CampaignBuilder::new("bad").attack("a", 10, &[0]).build())
        .await?;
    let good = coordinator
        .create_campaign(&CampaignBuilder::new("good").attack("a", 10, &[]).build())
        .await?;
    service.send(RuntimeEvent::StartCampaign(bad.id)).await?;
    service.send(RuntimeEvent::StartCampaign(good.id)).await?;

    with_timeout(async {
        while harness.store.task_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let bad = harness.store.campaign(bad.id).await?.unwrap();
    assert_eq!(bad.status, CampaignStatus::Failed);

    with_timeout(service.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn requested_sweep_reclaims_from_silent_agents() -> TestResult {
    let mut settings = test_settings(100);
    settings.liveness.offline_threshold = chrono::Duration::milliseconds(20);
    let harness = TestFleet::new(settings);
    harness.agent("rig-1").await;

    let coordinator = &harness.fleet.coordinator;
    let campaign = coordinator
        .create_campaign(&CampaignBuilder::new("sweep").attack("a", 10, &[]).build())
        .await?;
    coordinator.start_campaign(campaign.id).await?;
    let task = claimed(harness.fleet.router.claim("rig-1").await?);

    let service = FleetService::start(harness.fleet.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.send(RuntimeEvent::SweepRequested).await?;

    with_timeout(async {
        loop {
            let stored = harness.store.task(task.id).await.unwrap().unwrap();
            if stored.status == TaskStatus::Pending {
                assert_eq!(stored.attempts, 1);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    with_timeout(service.shutdown()).await?;
    Ok(())
}
