//! Functional tests for the feedback loop driven through the orchestrator.
//!
//! Core guarantees exercised here:
//! - Each feedback call performs exactly one corrective action and records
//!   its outcome in the originating context.
//! - Unknown feedback types are rejected without touching the context.
//! - Payloads must match their feedback type.

use maestro_core::feedback::CorrectionAction;
use maestro_core::{
    names, Bag, ContextRequest, CorrectionParams, ExecutionContext, FeedbackError,
    FeedbackOutcome, FeedbackPayload, FeedbackRequest, FeedbackType, MaestroConfig, MaestroError,
    RefineParams, RefineStep, RetryParams, TaskId, ValidationIssue,
};
use maestro_test_utils::{
    new_log, setup_test_orchestrator, setup_test_orchestrator_with, MockCapability,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn request(kind: FeedbackType, payload: FeedbackPayload) -> (FeedbackRequest, Arc<ExecutionContext>) {
    let context = Arc::new(ExecutionContext::new("review src/auth.rs"));
    let request = FeedbackRequest::new(TaskId::new(), TaskId::new(), kind, payload, Arc::clone(&context));
    (request, context)
}

/// Tenet: unknown feedback types are rejected and change nothing.
#[tokio::test]
async fn unknown_type_is_rejected() {
    let (orchestrator, log) = setup_test_orchestrator();
    let kind: FeedbackType = "escalate".parse().unwrap();
    let (feedback, context) = request(kind, FeedbackPayload::None);
    let before = context.snapshot();

    let err = orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MaestroError::Feedback(FeedbackError::UnknownType(ref tag)) if tag == "escalate"
    ));
    assert_eq!(context.snapshot(), before);
    assert!(log.lock().is_empty());
}

/// Tenet: a payload of the wrong shape is an error, not a guess.
#[tokio::test]
async fn mismatched_payload_is_rejected() {
    let (orchestrator, _log) = setup_test_orchestrator();
    let (feedback, _) = request(FeedbackType::Retry, FeedbackPayload::None);

    let err = orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MaestroError::Feedback(FeedbackError::InvalidPayload { .. })
    ));
}

/// Tenet: retry re-invokes the original capability with a retry marker.
#[tokio::test]
async fn retry_reinvokes_capability() {
    let (orchestrator, log) = setup_test_orchestrator();
    let (feedback, context) = request(
        FeedbackType::Retry,
        FeedbackPayload::Retry(RetryParams {
            capability: names::SEARCH.into(),
            content: "look harder".into(),
            params: Bag::new(),
        }),
    );

    let outcome = orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap();

    assert_eq!(outcome, FeedbackOutcome::Retried { success: true });
    let calls = log.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].capability, names::SEARCH);
    assert_eq!(calls[0].prompt, "Retry: look harder");
    let marker = calls[0].request.context.retry.as_ref().unwrap();
    assert_eq!(marker.original_task, feedback.target_task);

    let stored = context
        .get(&format!("retry_{}_result", feedback.target_task))
        .unwrap();
    assert_eq!(stored["success"], serde_json::json!(true));
}

/// Tenet: retries are admitted by the worker pool like planned tasks.
///
/// A retry of an erroring capability takes one pool slot and surfaces the
/// capability error to the feedback caller.
#[tokio::test]
async fn retry_runs_through_worker_pool() {
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default().with_max_workers(1),
        vec![
            MockCapability::succeed(names::SEARCH).into_arc(),
            MockCapability::error(names::CODE_ANALYSIS).into_arc(),
        ],
    );
    let retry = |capability: &str| {
        request(
            FeedbackType::Retry,
            FeedbackPayload::Retry(RetryParams {
                capability: capability.into(),
                content: "again".into(),
                params: Bag::new(),
            }),
        )
    };

    let (feedback, _) = retry(names::SEARCH);
    orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap();
    assert_eq!(orchestrator.pool_stats().submitted, 1);

    let (feedback, context) = retry(names::CODE_ANALYSIS);
    let err = orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MaestroError::Feedback(FeedbackError::Execution(ref message)) if message.starts_with("retry execution failed")
    ));
    assert_eq!(orchestrator.pool_stats().submitted, 2);
    assert!(!context.contains(&format!("retry_{}_result", feedback.target_task)));
}

/// Tenet: more context is gathered through the context capability.
#[tokio::test]
async fn need_more_context_gathers_through_file_operations() {
    let (orchestrator, log) = setup_test_orchestrator();
    let (feedback, context) = request(
        FeedbackType::NeedMoreContext,
        FeedbackPayload::ContextRequest(ContextRequest {
            context_type: "dependencies".into(),
            target: "src/auth.rs".into(),
        }),
    );

    let outcome = orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap();

    assert_eq!(outcome, FeedbackOutcome::ContextGathered { success: true });
    let calls = log.lock().clone();
    assert_eq!(calls[0].capability, names::FILE_OPERATIONS);
    assert_eq!(
        calls[0].prompt,
        "Gather additional context about src/auth.rs for dependencies"
    );
    assert!(context.get("additional_context").is_some());
}

/// Tenet: sequential refinement runs its steps in order.
#[tokio::test]
async fn sequential_refinement_runs_in_order() {
    let log = new_log();
    let orchestrator = setup_test_orchestrator_with(
        MaestroConfig::default(),
        vec![
            MockCapability::delay("agent1", Duration::from_millis(20))
                .with_log(Arc::clone(&log))
                .into_arc(),
            MockCapability::succeed("agent2").with_log(Arc::clone(&log)).into_arc(),
        ],
    );
    let (feedback, context) = request(
        FeedbackType::Refine,
        FeedbackPayload::Refine(RefineParams {
            steps: vec![
                RefineStep {
                    capability: "agent1".into(),
                    prompt: "tighten".into(),
                },
                RefineStep {
                    capability: "agent2".into(),
                    prompt: "polish".into(),
                },
            ],
            sequential: true,
        }),
    );

    let outcome = orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap();

    assert_eq!(outcome, FeedbackOutcome::Refined { succeeded: 2, failed: 0 });
    let order: Vec<String> = log.lock().iter().map(|c| c.capability.clone()).collect();
    assert_eq!(order, vec!["agent1", "agent2"]);
    let refined = context.get("refined_results").unwrap();
    assert_eq!(refined.as_object().unwrap().len(), 2);
}

/// Tenet: a timeout issue is auto-corrected by doubling the deadline.
#[tokio::test]
async fn timeout_issue_is_auto_corrected() {
    let (orchestrator, log) = setup_test_orchestrator();
    let mut issue = ValidationIssue::new("request timed out");
    issue.timeout = Some(Duration::from_secs(30));
    let (feedback, context) = request(
        FeedbackType::ValidationError,
        FeedbackPayload::ValidationIssue(issue),
    );

    let outcome = orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap();

    let FeedbackOutcome::Corrected(correction) = outcome else {
        panic!("expected a correction, got {outcome:?}");
    };
    assert_eq!(correction.strategy, "extend_timeout");
    assert_eq!(
        correction.actions,
        vec![CorrectionAction::SetTimeout {
            task: feedback.target_task,
            timeout: Duration::from_secs(60),
        }]
    );
    assert_eq!(
        context.get(&format!("task_{}_timeout_ms", feedback.target_task)),
        Some(serde_json::json!(60_000))
    );
    assert!(log.lock().is_empty());
}

/// Tenet: issues that cannot be corrected are learned as patterns.
#[tokio::test]
async fn uncorrectable_issue_is_recorded_as_pattern() {
    let (orchestrator, _log) = setup_test_orchestrator();
    let issue = ValidationIssue::new("wrong output").with_errors(["missing field `id`"]);
    let (feedback, _) = request(
        FeedbackType::ValidationError,
        FeedbackPayload::ValidationIssue(issue),
    );

    for expected in 1..=2 {
        let outcome = orchestrator
            .process_feedback(&CancellationToken::new(), &feedback)
            .await
            .unwrap();
        let FeedbackOutcome::PatternRecorded(pattern) = outcome else {
            panic!("expected a pattern, got {outcome:?}");
        };
        assert_eq!(pattern.occurrences, expected);
    }
    assert_eq!(orchestrator.feedback().learner().len(), 1);
}

/// Tenet: corrections that cannot be automated run as a correction task.
#[tokio::test]
async fn correction_falls_back_to_correction_capability() {
    let (orchestrator, log) = setup_test_orchestrator();
    let (feedback, context) = request(
        FeedbackType::Correction,
        FeedbackPayload::Correction(CorrectionParams {
            message: "rename the helper".into(),
            issue: None,
            params: Bag::new(),
        }),
    );

    let outcome = orchestrator
        .process_feedback(&CancellationToken::new(), &feedback)
        .await
        .unwrap();

    assert_eq!(outcome, FeedbackOutcome::CorrectionExecuted { success: true });
    let calls = log.lock().clone();
    assert_eq!(calls[0].capability, names::CODE_REVIEW);
    assert_eq!(
        calls[0].prompt,
        format!("Apply correction for task {}: rename the helper", feedback.target_task)
    );
    assert!(context
        .get(&format!("correction_{}_result", feedback.target_task))
        .is_some());
}
