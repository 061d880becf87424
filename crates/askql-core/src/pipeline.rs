//! Orchestrator: drives one request through the pipeline state machine
//!
//! ```text
//! Received → Translating → Validating → EstimatingCost → Executing
//!          → Narrating (optional) → Completed
//! ```
//!
//! Validation and cost rejections end the run as rejections; anything else
//! that goes wrong ends it as a failure. A narration failure is the one
//! recoverable outcome: the run completes without an explanation.

use std::sync::Arc;
use std::time::Instant;
use tracing::{field, Instrument, Level};
use uuid::Uuid;

use crate::config::{ConfigError, PipelineConfig, ValidationMode};
use crate::cost::{CostEstimator, Guardrail};
use crate::engine::DataEngine;
use crate::error::PipelineError;
use crate::execute::QueryExecutor;
use crate::llm::TextGenerator;
use crate::log_event;
use crate::model::{
    ApprovedQuery, ExecutionResult, GeneratedQuery, QueryRequest, QueryResponse, ValidatedQuery,
};
use crate::narrate::Narrator;
use crate::translate::QueryTranslator;
use crate::validate::{self, QueryValidator};

/// Pipeline position. Each variant owns what the next stage needs.
#[derive(Debug)]
pub enum PipelineState {
    Received,
    Translating,
    Validating(GeneratedQuery),
    EstimatingCost(ValidatedQuery),
    Executing(ApprovedQuery),
    Narrating {
        query: ApprovedQuery,
        result: ExecutionResult,
    },
    Completed(QueryResponse),
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Received => "received",
            PipelineState::Translating => "translating",
            PipelineState::Validating(_) => "validating",
            PipelineState::EstimatingCost(_) => "estimating_cost",
            PipelineState::Executing(_) => "executing",
            PipelineState::Narrating { .. } => "narrating",
            PipelineState::Completed(_) => "completed",
        }
    }
}

/// Result of one stage.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Ok(T),
    /// The stage failed but produced a usable fallback
    Recoverable(T),
    Fatal(PipelineError),
}

/// Per-request values shared by every stage.
#[derive(Debug)]
pub struct RunContext {
    request: QueryRequest,
    session_id: String,
    include_explanation: bool,
}

impl RunContext {
    pub fn new(request: QueryRequest, config: &PipelineConfig) -> Self {
        let session_id = request.session_or_anonymous().to_string();
        let include_explanation = request
            .include_explanation
            .unwrap_or(config.include_explanation);
        Self {
            request,
            session_id,
            include_explanation,
        }
    }
}

pub struct Orchestrator {
    config: PipelineConfig,
    translator: QueryTranslator,
    validator: QueryValidator,
    estimator: CostEstimator,
    guardrail: Guardrail,
    executor: QueryExecutor,
    narrator: Narrator,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        llm: Arc<dyn TextGenerator>,
        engine: Arc<dyn DataEngine>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let translator =
            QueryTranslator::new(llm.clone(), config.translation, config.llm_timeout());
        let validator = match config.validation_mode {
            ValidationMode::Heuristic => QueryValidator::heuristic(),
            ValidationMode::Model => {
                QueryValidator::model(llm.clone(), config.validation, config.llm_timeout())
            }
        };
        let estimator = CostEstimator::new(engine.clone(), config.estimate_timeout());
        let guardrail = Guardrail::new(config.max_bytes);
        let executor = QueryExecutor::new(engine, config.row_cap, config.execution_timeout());
        let narrator = Narrator::new(
            llm,
            config.narration,
            config.llm_timeout(),
            config.narration_max_rows,
        );

        Ok(Self {
            config,
            translator,
            validator,
            estimator,
            guardrail,
            executor,
            narrator,
        })
    }

    /// Schema description handed to the translator on every request.
    pub fn with_schema_context(mut self, schema_context: Option<String>) -> Self {
        self.translator = self.translator.with_schema_context(schema_context);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Convenience form of [`Orchestrator::run_query`].
    pub async fn run(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        include_explanation: Option<bool>,
    ) -> Result<QueryResponse, PipelineError> {
        let mut request = QueryRequest::new(prompt);
        request.session_id = session_id.map(String::from);
        request.include_explanation = include_explanation;
        self.run_query(request).await
    }

    /// Run the full pipeline under the request deadline. Dropping the
    /// returned future abandons whatever external call is in flight.
    pub async fn run_query(&self, request: QueryRequest) -> Result<QueryResponse, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "run_query",
            %request_id,
            session_id = request.session_or_anonymous(),
            fingerprint = field::Empty,
        );

        let deadline = self.config.request_timeout();
        let started = Instant::now();

        let outcome = async {
            match tokio::time::timeout(deadline, self.drive(request)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(timeout_ms = self.config.request_timeout_ms, "Request deadline elapsed");
                    Err(PipelineError::DeadlineExceeded {
                        timeout_ms: self.config.request_timeout_ms,
                    })
                }
            }
        }
        .instrument(span)
        .await;

        match &outcome {
            Ok(response) => tracing::info!(
                %request_id,
                rows = response.data.len(),
                bytes_processed = response.bytes_processed,
                total_ms = started.elapsed().as_millis() as u64,
                "Query completed"
            ),
            Err(e) if e.is_rejection() => tracing::info!(%request_id, kind = e.kind(), "Query rejected: {}", e),
            Err(e) => tracing::warn!(%request_id, kind = e.kind(), "Query failed: {}", e),
        }

        outcome
    }

    async fn drive(&self, request: QueryRequest) -> Result<QueryResponse, PipelineError> {
        let run = RunContext::new(request, &self.config);
        let mut state = PipelineState::Received;

        loop {
            let stage = state.name();
            log_event!(level: Level::DEBUG, event: "stage_entered", stage: stage);

            state = match self.step(&run, state).await {
                StageOutcome::Ok(next) => next,
                StageOutcome::Recoverable(next) => {
                    log_event!(level: Level::WARN, event: "stage_recovered", stage: stage);
                    next
                }
                StageOutcome::Fatal(e) => {
                    match &e {
                        PipelineError::Execution(_) => {
                            tracing::error!(stage, "Stage failed: {}", e)
                        }
                        _ if e.is_rejection() => tracing::info!(stage, "Stage rejected: {}", e),
                        _ => tracing::warn!(stage, "Stage failed: {}", e),
                    }
                    return Err(e);
                }
            };

            if let PipelineState::Completed(response) = state {
                return Ok(response);
            }
        }
    }

    /// Advance exactly one stage.
    pub async fn step(&self, run: &RunContext, state: PipelineState) -> StageOutcome<PipelineState> {
        match state {
            PipelineState::Received => match run.request.check_prompt() {
                Ok(()) => StageOutcome::Ok(PipelineState::Translating),
                Err(reason) => StageOutcome::Fatal(PipelineError::InvalidRequest(reason)),
            },

            PipelineState::Translating => {
                match self
                    .translator
                    .translate(&run.request.prompt, run.request.context.as_deref())
                    .await
                {
                    Ok(query) => {
                        tracing::Span::current().record("fingerprint", query.fingerprint().as_str());
                        log_event!(
                            level: Level::INFO,
                            event: "query_generated",
                            complexity: query.estimated_complexity,
                            query: query.query_text,
                        );
                        StageOutcome::Ok(PipelineState::Validating(query))
                    }
                    Err(e) => StageOutcome::Fatal(e.into()),
                }
            }

            PipelineState::Validating(query) => {
                let verdict = self.validator.validate(&query.query_text).await;
                match validate::approve(query, verdict) {
                    Ok(validated) => {
                        if !validated.verdict().suggestions.is_empty() {
                            tracing::debug!(
                                suggestions = ?validated.verdict().suggestions,
                                "Query passed validation with advisories"
                            );
                        }
                        StageOutcome::Ok(PipelineState::EstimatingCost(validated))
                    }
                    Err(verdict) => StageOutcome::Fatal(PipelineError::ValidationRejected {
                        issues: verdict.issues,
                        suggestions: verdict.suggestions,
                    }),
                }
            }

            PipelineState::EstimatingCost(validated) => {
                let estimate = match self.estimator.estimate(&validated).await {
                    Ok(estimate) => estimate,
                    Err(e) => return StageOutcome::Fatal(e.into()),
                };
                log_event!(
                    level: Level::INFO,
                    event: "cost_estimated",
                    bytes_projected: estimate.bytes_projected,
                    max_bytes: self.guardrail.max_bytes(),
                );
                match self.guardrail.check(validated, estimate) {
                    Ok(approved) => StageOutcome::Ok(PipelineState::Executing(approved)),
                    Err(e) => StageOutcome::Fatal(e),
                }
            }

            PipelineState::Executing(approved) => match self.executor.execute(&approved).await {
                Ok(result) => {
                    log_event!(
                        level: Level::INFO,
                        event: "query_executed",
                        rows: result.rows.len(),
                        bytes_processed: result.bytes_processed,
                        elapsed_ms: result.elapsed_ms,
                    );
                    if run.include_explanation && !result.rows.is_empty() {
                        StageOutcome::Ok(PipelineState::Narrating {
                            query: approved,
                            result,
                        })
                    } else {
                        StageOutcome::Ok(PipelineState::Completed(respond(
                            run, &approved, result, None,
                        )))
                    }
                }
                Err(e) => StageOutcome::Fatal(e.into()),
            },

            PipelineState::Narrating { query, result } => {
                match self
                    .narrator
                    .narrate(&run.request.prompt, &query.query().query_text, &result.rows)
                    .await
                {
                    Ok(text) => StageOutcome::Ok(PipelineState::Completed(respond(
                        run,
                        &query,
                        result,
                        Some(text),
                    ))),
                    Err(e) => {
                        tracing::warn!("Narration failed, returning results without explanation: {}", e);
                        StageOutcome::Recoverable(PipelineState::Completed(respond(
                            run, &query, result, None,
                        )))
                    }
                }
            }

            PipelineState::Completed(response) => StageOutcome::Ok(PipelineState::Completed(response)),
        }
    }
}

fn respond(
    run: &RunContext,
    query: &ApprovedQuery,
    result: ExecutionResult,
    explanation: Option<String>,
) -> QueryResponse {
    QueryResponse {
        data: result.rows,
        query_text: query.query().query_text.clone(),
        explanation,
        execution_time_ms: result.elapsed_ms,
        bytes_processed: result.bytes_processed,
        cached: false,
        session_id: run.session_id.clone(),
    }
}
