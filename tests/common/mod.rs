#![allow(dead_code)]

pub use fleetsched_test_utils::{init_tracing, with_timeout};

use fleetsched::router::{ClaimOutcome, ReportOutcome};
use fleetsched::types::{TaskId, TaskOutcome};
use fleetsched_test_utils::TestFleet;

/// Claim and complete tasks as `agent` until nothing is left to claim.
/// Returns the ids completed, in claim order.
pub async fn drain_as(harness: &TestFleet, agent: &str) -> Vec<TaskId> {
    let mut done = Vec::new();
    loop {
        match harness.fleet.router.claim(agent).await.expect("claim") {
            ClaimOutcome::Claimed(task) => {
                let outcome = harness
                    .fleet
                    .coordinator
                    .report(task.id, agent, TaskOutcome::Completed)
                    .await
                    .expect("report");
                assert!(matches!(outcome, ReportOutcome::Accepted(_)));
                done.push(task.id);
            }
            ClaimOutcome::NoTaskAvailable => return done,
            other => panic!("unexpected claim outcome: {other:?}"),
        }
    }
}

pub fn claimed(outcome: ClaimOutcome) -> fleetsched::model::Task {
    match outcome {
        ClaimOutcome::Claimed(task) => task,
        other => panic!("expected a claimed task, got {other:?}"),
    }
}
