//! End-to-end pipeline behaviour with stub collaborators

mod common;

use askql_core::error::TranslationError;
use askql_core::pipeline::{PipelineState, RunContext, StageOutcome};
use askql_core::{
    Generation, Orchestrator, PipelineConfig, PipelineError, QueryRequest, ValidationMode,
};
use common::{StubEngine, StubLlm, VACANT_QUERY};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(
    config: PipelineConfig,
    llm: &Arc<StubLlm>,
    engine: &Arc<StubEngine>,
) -> Orchestrator {
    Orchestrator::new(config, llm.clone(), engine.clone()).unwrap()
}

#[tokio::test]
async fn test_vacant_units_scenario_executes() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let engine = Arc::new(StubEngine::new(1024));
    let config = PipelineConfig {
        max_bytes: 1_000_000,
        ..Default::default()
    };

    let response = orchestrator(config, &llm, &engine)
        .run("show vacant units", None, Some(true))
        .await
        .unwrap();

    assert_eq!(response.query_text, VACANT_QUERY);
    assert_eq!(response.data.len(), 2);
    assert_eq!(response.explanation.as_deref(), Some("There are 2 vacant units."));
    assert_eq!(response.bytes_processed, 1024);
    assert_eq!(response.execution_time_ms, 7);
    assert!(!response.cached);
    assert_eq!(response.session_id, "anonymous");
    assert_eq!(engine.estimates(), 1);
    assert_eq!(engine.executions(), 1);
}

#[tokio::test]
async fn test_prompt_length_rejected_before_any_call() {
    for prompt in ["hi".to_string(), "  a ".to_string(), "x".repeat(501)] {
        let llm = Arc::new(StubLlm::new(VACANT_QUERY));
        let engine = Arc::new(StubEngine::new(1024));

        let err = orchestrator(PipelineConfig::default(), &llm, &engine)
            .run_query(QueryRequest::new(prompt))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert_eq!(llm.total_calls(), 0);
        assert_eq!(engine.estimates(), 0);
        assert_eq!(engine.executions(), 0);
    }
}

#[tokio::test]
async fn test_cost_exceeded_never_executes() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let engine = Arc::new(StubEngine::new(2_000_000_000));
    let config = PipelineConfig {
        max_bytes: 500_000_000,
        ..Default::default()
    };

    let err = orchestrator(config, &llm, &engine)
        .run("show vacant units", None, None)
        .await
        .unwrap_err();

    match err {
        PipelineError::CostExceeded {
            projected_bytes,
            max_bytes,
            ref suggestion,
        } => {
            assert_eq!(projected_bytes, 2_000_000_000);
            assert_eq!(max_bytes, 500_000_000);
            assert!(!suggestion.is_empty());
        }
        other => panic!("expected CostExceeded, got {other:?}"),
    }
    assert_eq!(engine.estimates(), 1);
    assert_eq!(engine.executions(), 0);
    assert_eq!(llm.narrate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_model_rejection_skips_estimate_and_execute() {
    let mut stub = StubLlm::new("SELECT * FROM units WHERE status='vacant' LIMIT 100");
    stub.verdict = Some(json!({
        "is_valid": false,
        "issues": ["missing LIMIT clause"],
        "suggestions": ["Add LIMIT 100"]
    }));
    let llm = Arc::new(stub);
    let engine = Arc::new(StubEngine::new(1024));
    let config = PipelineConfig {
        validation_mode: ValidationMode::Model,
        ..Default::default()
    };

    let err = orchestrator(config, &llm, &engine)
        .run("show vacant units", None, None)
        .await
        .unwrap_err();

    match err {
        PipelineError::ValidationRejected {
            issues,
            suggestions,
        } => {
            assert_eq!(issues, vec!["missing LIMIT clause".to_string()]);
            assert_eq!(suggestions, vec!["Add LIMIT 100".to_string()]);
        }
        other => panic!("expected ValidationRejected, got {other:?}"),
    }
    assert_eq!(engine.estimates(), 0);
    assert_eq!(engine.executions(), 0);
}

#[tokio::test]
async fn test_unreachable_reviewer_rejects() {
    let mut stub = StubLlm::new(VACANT_QUERY);
    stub.verdict = None;
    let llm = Arc::new(stub);
    let engine = Arc::new(StubEngine::new(1024));
    let config = PipelineConfig {
        validation_mode: ValidationMode::Model,
        ..Default::default()
    };

    let err = orchestrator(config, &llm, &engine)
        .run("show vacant units", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ValidationRejected { ref issues, .. } if issues.len() == 1));
    assert_eq!(engine.estimates(), 0);
}

#[tokio::test]
async fn test_heuristic_rejects_unbounded_query() {
    let llm = Arc::new(StubLlm::new("SELECT unit FROM units WHERE status = 'vacant'"));
    let engine = Arc::new(StubEngine::new(1024));

    let err = orchestrator(PipelineConfig::default(), &llm, &engine)
        .run("show vacant units", None, None)
        .await
        .unwrap_err();

    let report = err.report();
    assert_eq!(report.kind, "validation_rejected");
    assert_eq!(report.issues, vec!["missing LIMIT clause".to_string()]);
    assert!(!report.suggestions.is_empty());
    assert_eq!(llm.review_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(engine.estimates(), 0);
}

#[tokio::test]
async fn test_no_narration_when_not_requested() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let engine = Arc::new(StubEngine::new(1024));

    let response = orchestrator(PipelineConfig::default(), &llm, &engine)
        .run("show vacant units", Some("s-42"), Some(false))
        .await
        .unwrap();

    assert!(response.explanation.is_none());
    assert_eq!(response.data.len(), 2);
    assert_eq!(response.session_id, "s-42");
    assert_eq!(llm.narrate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_narration_for_empty_result() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let mut stub = StubEngine::new(1024);
    stub.rows.clear();
    let engine = Arc::new(stub);

    let response = orchestrator(PipelineConfig::default(), &llm, &engine)
        .run("show vacant units", None, Some(true))
        .await
        .unwrap();

    assert!(response.data.is_empty());
    assert!(response.explanation.is_none());
    assert_eq!(llm.narrate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_narration_failure_is_absorbed() {
    let mut stub = StubLlm::new(VACANT_QUERY);
    stub.narration = None;
    let llm = Arc::new(stub);
    let engine = Arc::new(StubEngine::new(1024));

    let response = orchestrator(PipelineConfig::default(), &llm, &engine)
        .run("show vacant units", None, Some(true))
        .await
        .unwrap();

    assert!(response.explanation.is_none());
    assert_eq!(response.data, common::vacant_rows());
    assert_eq!(llm.narrate_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_explanation_default_comes_from_config() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let engine = Arc::new(StubEngine::new(1024));
    let config = PipelineConfig {
        include_explanation: false,
        ..Default::default()
    };

    let orchestrator = orchestrator(config, &llm, &engine);
    assert!(!orchestrator.config().include_explanation);

    let response = orchestrator
        .run("show vacant units", None, None)
        .await
        .unwrap();

    assert!(response.explanation.is_none());
    assert_eq!(llm.narrate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_request_options_reach_the_pipeline() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let engine = Arc::new(StubEngine::new(1024));
    let request = QueryRequest::new("show vacant units")
        .with_session("s-7")
        .with_explanation(false)
        .with_context("units are apartments in building A");

    let response = orchestrator(PipelineConfig::default(), &llm, &engine)
        .run_query(request)
        .await
        .unwrap();

    assert_eq!(response.session_id, "s-7");
    assert!(response.explanation.is_none());
    let prompts = llm.translate_prompts.lock().unwrap();
    assert!(prompts[0].contains("units are apartments in building A"));
    assert!(prompts[0].contains("show vacant units"));
}

#[tokio::test]
async fn test_free_text_translation_fails_before_engine() {
    let mut stub = StubLlm::new(VACANT_QUERY);
    stub.translation = Some(Generation::Text("SELECT * FROM units".to_string()));
    let llm = Arc::new(stub);
    let engine = Arc::new(StubEngine::new(1024));

    let err = orchestrator(PipelineConfig::default(), &llm, &engine)
        .run("show vacant units", None, Some(true))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Translation(TranslationError::MissingPayload)
    ));
    assert!(!err.is_rejection());
    assert_eq!(err.report().kind, "translation_error");
    assert_eq!(llm.total_calls(), 1);
    assert_eq!(engine.estimates(), 0);
    assert_eq!(engine.executions(), 0);
}

#[tokio::test]
async fn test_malformed_translation_fails_before_engine() {
    let mut stub = StubLlm::new(VACANT_QUERY);
    stub.translation = Some(Generation::Structured(json!({"query": 42})));
    let llm = Arc::new(stub);
    let engine = Arc::new(StubEngine::new(1024));

    let err = orchestrator(PipelineConfig::default(), &llm, &engine)
        .run("show vacant units", None, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Translation(TranslationError::Malformed(_))
    ));
    assert_eq!(engine.estimates(), 0);
    assert_eq!(engine.executions(), 0);
}

#[tokio::test]
async fn test_narration_timeout_is_absorbed() {
    let mut stub = StubLlm::new(VACANT_QUERY);
    stub.narrate_delay = Duration::from_millis(500);
    let llm = Arc::new(stub);
    let engine = Arc::new(StubEngine::new(1024));
    let config = PipelineConfig {
        llm_timeout_ms: 20,
        ..Default::default()
    };

    let response = orchestrator(config, &llm, &engine)
        .run("show vacant units", None, Some(true))
        .await
        .unwrap();

    assert!(response.explanation.is_none());
    assert_eq!(response.data, common::vacant_rows());
    assert_eq!(llm.narrate_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(engine.executions(), 1);
}

#[tokio::test]
async fn test_repeated_runs_are_consistent() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let engine = Arc::new(StubEngine::new(1024));
    let orchestrator = orchestrator(PipelineConfig::default(), &llm, &engine);

    let first = orchestrator.run("show vacant units", None, Some(false)).await.unwrap();
    let second = orchestrator.run("show vacant units", None, Some(false)).await.unwrap();

    assert_eq!(first.query_text, second.query_text);
    assert_eq!(first.data.len(), second.data.len());
    let keys = |r: &askql_core::QueryResponse| -> Vec<Vec<String>> {
        r.data.iter().map(|row| row.keys().cloned().collect()).collect()
    };
    assert_eq!(keys(&first), keys(&second));
}

#[tokio::test]
async fn test_execution_failure_surfaces() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let mut stub = StubEngine::new(1024);
    stub.fail_execute = true;
    let engine = Arc::new(stub);

    let err = orchestrator(PipelineConfig::default(), &llm, &engine)
        .run("show vacant units", None, Some(true))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Execution(_)));
    assert!(!err.is_rejection());
    assert_eq!(llm.narrate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_execution_timeout() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let mut stub = StubEngine::new(1024);
    stub.execute_delay = Duration::from_millis(500);
    let engine = Arc::new(stub);
    let config = PipelineConfig {
        execution_timeout_ms: 20,
        ..Default::default()
    };

    let err = orchestrator(config, &llm, &engine)
        .run("show vacant units", None, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Execution(askql_core::ExecutionError::Timeout { timeout_ms: 20 })
    ));
}

#[tokio::test]
async fn test_request_deadline_abandons_pipeline() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let mut stub = StubEngine::new(1024);
    stub.execute_delay = Duration::from_millis(500);
    let engine = Arc::new(stub);
    let config = PipelineConfig {
        request_timeout_ms: 30,
        ..Default::default()
    };

    let err = orchestrator(config, &llm, &engine)
        .run("show vacant units", None, Some(true))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DeadlineExceeded { timeout_ms: 30 }));
    assert_eq!(llm.narrate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_step_received_to_translating() {
    let llm = Arc::new(StubLlm::new(VACANT_QUERY));
    let engine = Arc::new(StubEngine::new(1024));
    let config = PipelineConfig::default();
    let orchestrator = orchestrator(config.clone(), &llm, &engine);
    let run = RunContext::new(QueryRequest::new("show vacant units"), &config);

    let next = orchestrator.step(&run, PipelineState::Received).await;
    assert!(matches!(next, StageOutcome::Ok(PipelineState::Translating)));

    let next = match orchestrator.step(&run, PipelineState::Translating).await {
        StageOutcome::Ok(state) => state,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(next.name(), "validating");
    assert_eq!(llm.total_calls(), 1);
    assert_eq!(engine.estimates(), 0);
}
