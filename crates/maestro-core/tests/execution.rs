//! Functional tests for staged plan execution.
//!
//! Core guarantees exercised here:
//! - Stages run in order and a stage starts only after the previous one has
//!   fully finished.
//! - Tasks inside one stage run concurrently through the worker pool.
//! - One failing task never aborts its peers or later stages.
//! - Timeouts and cancellation are reported per task, not as plan errors.

use maestro_core::{
    CapabilityRequest, Coordinator, ExecutionContext, ExecutionPlan, MaestroConfig, Task,
    TaskExecutionError,
};
use maestro_test_utils::{
    create_parallel_plan, create_test_plan, new_log, setup_test_orchestrator_with, MockCapability,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn context() -> Arc<ExecutionContext> {
    Arc::new(ExecutionContext::new("integration"))
}

/// Tenet: a linear plan runs its tasks strictly one after another.
///
/// `create_test_plan` chains every task on its predecessor, so each lands in
/// its own stage. The invocation log must show the plan order, and each call
/// must begin after the previous one ended.
#[tokio::test]
async fn linear_plan_runs_in_order() {
    let log = new_log();
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        ["agent1", "agent2", "agent3"]
            .into_iter()
            .map(|name| MockCapability::succeed(name).with_log(Arc::clone(&log)).into_arc())
            .collect(),
    );
    let plan = create_test_plan(&["agent1", "agent2", "agent3"]);
    assert_eq!(plan.stages.len(), 3);

    let results = orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &context())
        .await
        .unwrap();

    assert!(results.iter().all(|r| r.is_success()));
    let calls = log.lock().clone();
    let order: Vec<&str> = calls.iter().map(|c| c.capability.as_str()).collect();
    assert_eq!(order, vec!["agent1", "agent2", "agent3"]);
    for pair in calls.windows(2) {
        assert!(pair[1].started_at >= pair[0].ended_at);
    }
}

/// Tenet: tasks in one stage overlap in time.
///
/// Three 50ms tasks in a single stage must finish well under the 150ms a
/// sequential run would need, and their execution windows must overlap.
#[tokio::test]
async fn single_stage_runs_in_parallel() {
    let log = new_log();
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        ["agent1", "agent2", "agent3"]
            .into_iter()
            .map(|name| {
                MockCapability::delay(name, Duration::from_millis(50))
                    .with_log(Arc::clone(&log))
                    .into_arc()
            })
            .collect(),
    );
    let plan = create_parallel_plan(&["agent1", "agent2", "agent3"]);
    assert_eq!(plan.stages.len(), 1);

    let started = Instant::now();
    let results = orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &context())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_success()));
    assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");

    let calls = log.lock().clone();
    let mut overlapping = 0;
    for (i, a) in calls.iter().enumerate() {
        for b in &calls[i + 1..] {
            if a.started_at < b.ended_at && b.started_at < a.ended_at {
                overlapping += 1;
            }
        }
    }
    assert!(overlapping >= 2, "only {overlapping} overlapping pairs");
}

/// Tenet: partial failure is tolerated.
///
/// A failed result and a raised error sit next to a success in the same
/// stage; all three come back and only the success counts as successful.
#[tokio::test]
async fn partial_failure_returns_every_result() {
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        vec![
            MockCapability::succeed("good").into_arc(),
            MockCapability::fail("bad").into_arc(),
            MockCapability::error("broken").into_arc(),
        ],
    );
    let plan = create_parallel_plan(&["good", "bad", "broken"]);

    let results = orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &context())
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    let successes: Vec<&str> = results
        .iter()
        .filter(|r| r.is_success())
        .map(|r| r.task.capability.as_str())
        .collect();
    assert_eq!(successes, vec!["good"]);

    let broken = results.iter().find(|r| r.task.capability == "broken").unwrap();
    assert!(matches!(
        broken.error,
        Some(TaskExecutionError::CapabilityFailed { .. })
    ));
    let bad = results.iter().find(|r| r.task.capability == "bad").unwrap();
    assert!(bad.error.is_none());
    assert!(!bad.result.success);
}

/// Tenet: a failed dependency still counts as executed.
///
/// The second task of a chain runs even though the first one failed, and the
/// failure of the first does not stop the plan.
#[tokio::test]
async fn dependents_of_failed_tasks_still_run() {
    let first = MockCapability::error("first");
    let second = MockCapability::succeed("second");
    let second_log = second.log();
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        vec![first.into_arc(), second.into_arc()],
    );
    let plan = create_test_plan(&["first", "second"]);

    let results = orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &context())
        .await
        .unwrap();

    assert!(!results[0].is_success());
    assert!(results[1].is_success());
    assert_eq!(second_log.lock().len(), 1);
}

/// Tenet: a missing capability fails only its own task.
#[tokio::test]
async fn missing_capability_is_a_task_error() {
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        vec![MockCapability::succeed("present").into_arc()],
    );
    let plan = create_parallel_plan(&["present", "absent"]);

    let results = orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &context())
        .await
        .unwrap();

    let absent = results.iter().find(|r| r.task.capability == "absent").unwrap();
    assert_eq!(
        absent.error,
        Some(TaskExecutionError::CapabilityNotFound("absent".into()))
    );
    assert!(results.iter().any(|r| r.is_success()));
}

/// Tenet: per-task deadlines are reported as timeouts.
///
/// The capability observes the cancelled child token; the executor reports
/// the deadline, not a plain cancellation.
#[tokio::test]
async fn task_timeout_is_reported() {
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        vec![MockCapability::delay("slow", Duration::from_secs(5)).into_arc()],
    );
    let task = Task::new("slow", CapabilityRequest::new("take your time"))
        .with_timeout(Duration::from_millis(50));
    let plan = ExecutionPlan::from_tasks(vec![task]).unwrap();

    let started = Instant::now();
    let results = orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &context())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        results[0].error,
        Some(TaskExecutionError::TimedOut { .. })
    ));
}

/// Tenet: a sub-second default deadline is honored as given.
///
/// A 20ms task finishes well inside a 500ms default, while a 5s task is cut
/// off by the same default and reported against the 500ms deadline.
#[tokio::test]
async fn sub_second_default_timeout_is_applied() {
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default().with_task_timeout(Duration::from_millis(500)),
        vec![
            MockCapability::delay("quick", Duration::from_millis(20)).into_arc(),
            MockCapability::delay("slow", Duration::from_secs(5)).into_arc(),
        ],
    );
    let plan = create_parallel_plan(&["quick", "slow"]);

    let results = orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &context())
        .await
        .unwrap();

    let quick = results.iter().find(|r| r.task.capability == "quick").unwrap();
    assert!(quick.is_success(), "{:?}", quick.error);
    let slow = results.iter().find(|r| r.task.capability == "slow").unwrap();
    assert_eq!(
        slow.error,
        Some(TaskExecutionError::TimedOut {
            capability: "slow".into(),
            timeout: Duration::from_millis(500),
        })
    );
}

/// Tenet: cancelling the caller's token cancels running tasks.
#[tokio::test]
async fn caller_cancellation_reaches_tasks() {
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        vec![MockCapability::waits_for_cancel("blocked").into_arc()],
    );
    let plan = create_parallel_plan(&["blocked"]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let results = orchestrator
        .execute_with_plan(&cancel, &plan, &context())
        .await
        .unwrap();

    assert!(matches!(
        results[0].error,
        Some(TaskExecutionError::Cancelled { .. })
    ));
}

/// Tenet: finished tasks are written back into the shared context.
#[tokio::test]
async fn results_are_merged_into_context() {
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        vec![MockCapability::succeed("agent1").into_arc()],
    );
    let plan = create_parallel_plan(&["agent1"]);
    let ctx = context();

    orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &ctx)
        .await
        .unwrap();

    let key = format!("task_{}_result", plan.tasks[0].id);
    let stored = ctx.get(&key).expect("result stored");
    assert_eq!(stored["success"], serde_json::json!(true));
}

/// Tenet: the pool bounds concurrency.
///
/// With a single worker, three delayed tasks in one stage cannot overlap.
#[tokio::test]
async fn single_worker_serializes_a_stage() {
    let log = new_log();
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default().with_max_workers(1),
        ["agent1", "agent2", "agent3"]
            .into_iter()
            .map(|name| {
                MockCapability::delay(name, Duration::from_millis(20))
                    .with_log(Arc::clone(&log))
                    .into_arc()
            })
            .collect(),
    );
    let plan = create_parallel_plan(&["agent1", "agent2", "agent3"]);

    orchestrator
        .execute_with_plan(&CancellationToken::new(), &plan, &context())
        .await
        .unwrap();

    let mut calls = log.lock().clone();
    calls.sort_by_key(|c| c.started_at);
    for pair in calls.windows(2) {
        assert!(pair[1].started_at >= pair[0].ended_at);
    }
}
