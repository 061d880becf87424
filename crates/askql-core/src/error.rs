//! Error taxonomy for the pipeline
//!
//! Stage-level errors stay internal to their component. Callers only ever
//! see [`PipelineError`] and its serializable [`ErrorReport`].

use serde::Serialize;
use thiserror::Error;

/// Failures of the text-generation capability itself.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Text generation request failed: {0}")]
    Request(String),

    #[error("Text generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Text generation returned no content")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error(transparent)]
    Generation(#[from] LlmError),

    #[error("Model returned free text where a structured query was expected")]
    MissingPayload,

    #[error("Model returned a malformed query payload: {0}")]
    Malformed(String),

    #[error("Model returned an empty query")]
    EmptyQuery,
}

/// Failures reported by the data engine, for both estimate and execute.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Query rejected by engine: {0}")]
    QueryRejected(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Never leaves the orchestrator; absorbed into "no explanation".
#[derive(Debug, Error)]
pub enum NarrationError {
    #[error(transparent)]
    Generation(#[from] LlmError),

    #[error("Model returned an empty explanation")]
    Empty,

    #[error("Failed to render result rows: {0}")]
    Render(#[from] serde_json::Error),
}

/// The only error type exposed by [`crate::Orchestrator::run_query`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not translate the question into a query: {0}")]
    Translation(#[from] TranslationError),

    #[error("Generated query failed validation: {}", .issues.join("; "))]
    ValidationRejected {
        issues: Vec<String>,
        suggestions: Vec<String>,
    },

    #[error("Query would scan {projected_bytes} bytes, over the {max_bytes} byte limit")]
    CostExceeded {
        projected_bytes: u64,
        max_bytes: u64,
        suggestion: String,
    },

    #[error("Query execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Request exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded { timeout_ms: u64 },
}

impl PipelineError {
    /// User-correctable outcomes, as opposed to system faults.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidRequest(_)
                | PipelineError::ValidationRejected { .. }
                | PipelineError::CostExceeded { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::Translation(_) => "translation_error",
            PipelineError::ValidationRejected { .. } => "validation_rejected",
            PipelineError::CostExceeded { .. } => "cost_exceeded",
            PipelineError::Execution(_) => "execution_error",
            PipelineError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }

    pub fn report(&self) -> ErrorReport {
        let mut report = ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            projected_bytes: None,
            max_bytes: None,
        };
        match self {
            PipelineError::ValidationRejected {
                issues,
                suggestions,
            } => {
                report.issues = issues.clone();
                report.suggestions = suggestions.clone();
            }
            PipelineError::CostExceeded {
                projected_bytes,
                max_bytes,
                suggestion,
            } => {
                report.projected_bytes = Some(*projected_bytes);
                report.max_bytes = Some(*max_bytes);
                report.suggestions = vec![suggestion.clone()];
            }
            _ => {}
        }
        report
    }
}

/// Caller-facing rendering of a [`PipelineError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
}
