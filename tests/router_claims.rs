// tests/router_claims.rs

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use fleetsched::errors::FleetError;
use fleetsched::router::{ClaimOutcome, MemoryLanes, ReportOutcome, StaleReason};
use fleetsched::store::{FleetStore, MemoryStore};
use fleetsched::types::{AgentStatus, PriorityClass, TaskOutcome, TaskStatus};
use fleetsched_test_utils::builders::test_settings;
use fleetsched_test_utils::{CampaignBuilder, FaultyStore, FlakyLanes, TestFleet};

use common::{claimed, init_tracing};

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn started(harness: &TestFleet, priority: PriorityClass, total: u64) -> TestResult {
    let definition = CampaignBuilder::new("router")
        .priority(priority)
        .attack("only", total, &[])
        .build();
    let campaign = harness.fleet.coordinator.create_campaign(&definition).await?;
    harness.fleet.coordinator.start_campaign(campaign.id).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_assign_a_task_once() -> TestResult {
    init_tracing();
    let harness = Arc::new(TestFleet::new(test_settings(100)));
    started(&harness, PriorityClass::Normal, 100).await?;

    let agents: Vec<String> = (0..16).map(|i| format!("rig-{i}")).collect();
    for agent in &agents {
        harness.agent(agent).await;
    }

    let mut handles = Vec::new();
    for agent in agents {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            harness.fleet.router.claim(&agent).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if let ClaimOutcome::Claimed(_) = handle.await?? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_claimers_never_share_tasks() -> TestResult {
    let harness = Arc::new(TestFleet::new(test_settings(10)));
    started(&harness, PriorityClass::High, 500).await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let agent = format!("rig-{i}");
            harness.agent(&agent).await;
            let mut mine = Vec::new();
            while let ClaimOutcome::Claimed(task) = harness.fleet.router.claim(&agent).await? {
                mine.push(task.id);
            }
            Ok::<_, FleetError>(mine)
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await?? {
            assert!(seen.insert(id), "task {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 50);
    Ok(())
}

#[tokio::test]
async fn claim_sets_lease_and_marks_agent_busy() -> TestResult {
    let harness = TestFleet::new(test_settings(1000));
    started(&harness, PriorityClass::Normal, 2500).await?;
    harness.agent("rig-1").await;

    let task = claimed(harness.fleet.router.claim("rig-1").await?);
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assignee.as_deref(), Some("rig-1"));
    assert!(task.lease_expires_at.is_some());
    assert_eq!(task.range.start, 0);

    let stored = harness.store.task(task.id).await?.unwrap();
    assert_eq!(stored, task);

    let agent = harness.store.agent("rig-1").await?.unwrap();
    assert_eq!(agent.status, AgentStatus::Busy);
    Ok(())
}

#[tokio::test]
async fn unknown_agent_cannot_claim() -> TestResult {
    let harness = TestFleet::new(test_settings(1000));
    started(&harness, PriorityClass::Normal, 10).await?;

    let err = harness.fleet.router.claim("ghost").await.unwrap_err();
    assert!(matches!(err, FleetError::AgentNotFound(id) if id == "ghost"));
    Ok(())
}

#[tokio::test]
async fn report_from_non_holder_is_rejected() -> TestResult {
    let harness = TestFleet::new(test_settings(1000));
    started(&harness, PriorityClass::Normal, 10).await?;
    harness.agent("holder").await;
    harness.agent("intruder").await;

    let task = claimed(harness.fleet.router.claim("holder").await?);
    let outcome = harness
        .fleet
        .router
        .report(task.id, "intruder", TaskOutcome::Completed)
        .await?;
    assert_eq!(outcome, ReportOutcome::Rejected(StaleReason::NotHolder));

    let stored = harness.store.task(task.id).await?.unwrap();
    assert_eq!(stored.status, TaskStatus::Assigned);
    Ok(())
}

#[tokio::test]
async fn failures_retry_until_attempts_are_exhausted() -> TestResult {
    let harness = TestFleet::new(test_settings(1000));
    started(&harness, PriorityClass::Low, 10).await?;
    harness.agent("rig-1").await;

    // max_attempts = 3: the fourth failure is terminal.
    for attempt in 1..=4u32 {
        let task = claimed(harness.fleet.router.claim("rig-1").await?);
        let outcome = harness
            .fleet
            .router
            .report(
                task.id,
                "rig-1",
                TaskOutcome::Failed {
                    reason: "driver crash".into(),
                },
            )
            .await?;

        let ReportOutcome::Accepted(task) = outcome else {
            panic!("report rejected on attempt {attempt}");
        };
        assert_eq!(task.attempts, attempt);
        assert_eq!(task.assignee, None);
        let expected = if attempt > 3 {
            TaskStatus::Failed
        } else {
            TaskStatus::Pending
        };
        assert_eq!(task.status, expected);
    }

    assert_eq!(
        harness.fleet.router.claim("rig-1").await?,
        ClaimOutcome::NoTaskAvailable
    );
    Ok(())
}

#[tokio::test]
async fn completed_task_cannot_be_reported_twice() -> TestResult {
    let harness = TestFleet::new(test_settings(1000));
    started(&harness, PriorityClass::Normal, 10).await?;
    harness.agent("rig-1").await;

    let task = claimed(harness.fleet.router.claim("rig-1").await?);
    let first = harness
        .fleet
        .router
        .report(task.id, "rig-1", TaskOutcome::Completed)
        .await?;
    assert!(matches!(first, ReportOutcome::Accepted(_)));

    let second = harness
        .fleet
        .router
        .report(task.id, "rig-1", TaskOutcome::Completed)
        .await?;
    assert_eq!(second, ReportOutcome::Rejected(StaleReason::NotHeld));

    let agent = harness.store.agent("rig-1").await?.unwrap();
    assert_eq!(agent.status, AgentStatus::Online);
    Ok(())
}

#[tokio::test]
async fn lane_tagged_agent_only_draws_from_its_lane() -> TestResult {
    let harness = TestFleet::new(test_settings(1000));
    started(&harness, PriorityClass::High, 10).await?;
    harness.agent_with("low-pool", &["lane:low"]).await;
    harness.agent_with("high-pool", &["lane:high", "gpu"]).await;

    assert_eq!(
        harness.fleet.router.claim("low-pool").await?,
        ClaimOutcome::NoTaskAvailable
    );
    let task = claimed(harness.fleet.router.claim("high-pool").await?);
    assert_eq!(task.lane, PriorityClass::High);
    Ok(())
}

#[tokio::test]
async fn busy_high_lane_does_not_starve_low_lane() -> TestResult {
    let harness = TestFleet::new(test_settings(1));
    started(&harness, PriorityClass::High, 30).await?;
    started(&harness, PriorityClass::Low, 30).await?;
    harness.agent("generalist").await;

    let mut lanes = Vec::new();
    for _ in 0..6 {
        lanes.push(claimed(harness.fleet.router.claim("generalist").await?).lane);
    }
    assert!(lanes.contains(&PriorityClass::High));
    assert!(lanes.contains(&PriorityClass::Low));
    Ok(())
}

#[tokio::test]
async fn transient_lane_outage_is_retried() -> TestResult {
    let lanes = Arc::new(FlakyLanes::new(MemoryLanes::unbounded(), 0));
    let harness = TestFleet::with_lanes(test_settings(1000), lanes.clone());
    started(&harness, PriorityClass::Normal, 10).await?;
    harness.agent("rig-1").await;

    lanes.fail_next(2);
    let task = claimed(harness.fleet.router.claim("rig-1").await?);
    assert_eq!(task.range.end, 10);
    Ok(())
}

#[tokio::test]
async fn persistent_lane_outage_surfaces_an_error() -> TestResult {
    let lanes = Arc::new(FlakyLanes::new(MemoryLanes::unbounded(), 0));
    let harness = TestFleet::with_lanes(test_settings(1000), lanes.clone());
    started(&harness, PriorityClass::Normal, 10).await?;
    harness.agent("rig-1").await;

    lanes.fail_next(usize::MAX);
    let err = harness.fleet.router.claim("rig-1").await.unwrap_err();
    assert!(matches!(
        err,
        FleetError::RetriesExhausted {
            operation: "claim.pull",
            attempts: 4,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn mark_running_renews_the_lease() -> TestResult {
    let harness = TestFleet::new(test_settings(1000));
    started(&harness, PriorityClass::Normal, 10).await?;
    harness.agent("rig-1").await;

    let task = claimed(harness.fleet.router.claim("rig-1").await?);
    let later = chrono::Utc::now() + chrono::Duration::minutes(3);
    let outcome = harness.fleet.router.mark_running(task.id, "rig-1", later).await?;

    let ReportOutcome::Accepted(running) = outcome else {
        panic!("mark_running rejected");
    };
    assert_eq!(running.status, TaskStatus::Running);
    assert!(running.lease_expires_at > task.lease_expires_at);

    let stranger = harness.fleet.router.renew_lease(task.id, "other", later).await?;
    assert_eq!(stranger, ReportOutcome::Rejected(StaleReason::NotHolder));
    Ok(())
}

#[tokio::test]
async fn failure_report_during_lane_outage_is_republished_by_the_sweep() -> TestResult {
    let lanes = Arc::new(FlakyLanes::new(MemoryLanes::unbounded(), 0));
    let harness = TestFleet::with_lanes(test_settings(1000), lanes.clone());
    started(&harness, PriorityClass::Normal, 10).await?;
    harness.agent("rig-1").await;
    let router = &harness.fleet.router;

    let task = claimed(router.claim("rig-1").await?);

    // The store write lands; the requeue does not.
    lanes.fail_next(usize::MAX);
    let outcome = router
        .report(task.id, "rig-1", TaskOutcome::Failed { reason: "oom".into() })
        .await?;
    let ReportOutcome::Accepted(released) = outcome else {
        panic!("report rejected during lane outage");
    };
    assert_eq!(released.status, TaskStatus::Pending);
    assert_eq!(released.attempts, 1);

    let stored = harness.store.task(task.id).await?.unwrap();
    assert!(stored.awaiting_publish);

    lanes.fail_next(0);
    assert_eq!(router.claim("rig-1").await?, ClaimOutcome::NoTaskAvailable);

    let report = harness.fleet.monitor.sweep().await?;
    assert_eq!(report.tasks_republished, 1);
    assert!(!harness.store.task(task.id).await?.unwrap().awaiting_publish);

    let again = claimed(router.claim("rig-1").await?);
    assert_eq!(again.id, task.id);
    assert_eq!(again.attempts, 1);
    Ok(())
}

#[tokio::test]
async fn claim_failing_after_pull_puts_the_delivery_back() -> TestResult {
    let memory = Arc::new(MemoryStore::new());
    let store = Arc::new(FaultyStore::new(memory.clone()));
    let harness = TestFleet::with_parts(
        test_settings(1000),
        memory,
        store.clone(),
        Arc::new(MemoryLanes::unbounded()),
    );
    started(&harness, PriorityClass::Normal, 10).await?;
    harness.agent("rig-1").await;

    store.fail_task_loads(usize::MAX);
    let err = harness.fleet.router.claim("rig-1").await.unwrap_err();
    assert!(matches!(
        err,
        FleetError::RetriesExhausted {
            operation: "claim.load",
            ..
        }
    ));

    store.fail_task_loads(0);
    assert_eq!(harness.fleet.router.lane_depths().await?, [0, 1, 0]);
    let task = claimed(harness.fleet.router.claim("rig-1").await?);
    assert_eq!(task.range.end, 10);
    Ok(())
}

#[tokio::test]
async fn agent_stays_busy_while_it_holds_another_task() -> TestResult {
    let harness = TestFleet::new(test_settings(10));
    started(&harness, PriorityClass::Normal, 20).await?;
    harness.agent("rig-1").await;
    let router = &harness.fleet.router;

    let first = claimed(router.claim("rig-1").await?);
    let second = claimed(router.claim("rig-1").await?);

    router.report(first.id, "rig-1", TaskOutcome::Completed).await?;
    let agent = harness.store.agent("rig-1").await?.unwrap();
    assert_eq!(agent.status, AgentStatus::Busy);

    router.report(second.id, "rig-1", TaskOutcome::Completed).await?;
    let agent = harness.store.agent("rig-1").await?.unwrap();
    assert_eq!(agent.status, AgentStatus::Online);
    Ok(())
}
