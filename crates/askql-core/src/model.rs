//! Request, intermediate and response types for a single pipeline run.
//!
//! Every value here is created fresh per request and never shared between
//! requests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Minimum prompt length in characters.
pub const MIN_PROMPT_CHARS: usize = 3;
/// Maximum prompt length in characters.
pub const MAX_PROMPT_CHARS: usize = 500;
/// Session id reported when the caller does not supply one.
pub const ANONYMOUS_SESSION: &str = "anonymous";

/// One result record: field name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// An incoming natural-language question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// `None` falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_explanation: Option<bool>,

    /// Extra caller-supplied context forwarded to the translator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl QueryRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            session_id: None,
            include_explanation: None,
            context: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_explanation(mut self, include: bool) -> Self {
        self.include_explanation = Some(include);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Check the prompt length bounds. Surrounding whitespace is not counted.
    pub fn check_prompt(&self) -> Result<(), String> {
        let chars = self.prompt.trim().chars().count();
        if chars < MIN_PROMPT_CHARS {
            return Err(format!(
                "prompt must be at least {} characters (got {})",
                MIN_PROMPT_CHARS, chars
            ));
        }
        if chars > MAX_PROMPT_CHARS {
            return Err(format!(
                "prompt must be at most {} characters (got {})",
                MAX_PROMPT_CHARS, chars
            ));
        }
        Ok(())
    }

    pub fn session_or_anonymous(&self) -> &str {
        self.session_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(ANONYMOUS_SESSION)
    }
}

/// Coarse complexity label attached by the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Candidate query produced by the translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub query_text: String,
    pub explanation: String,
    pub estimated_complexity: Complexity,
}

impl GeneratedQuery {
    /// SHA-256 of the query text, used to correlate log lines.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.query_text.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ValidationVerdict {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn invalid(issue: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            issues: vec![issue.into()],
            suggestions: Vec::new(),
        }
    }
}

/// A query whose verdict came back valid. Only the validator builds these,
/// so holding one proves validation happened.
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    query: GeneratedQuery,
    verdict: ValidationVerdict,
}

impl ValidatedQuery {
    pub(crate) fn new(query: GeneratedQuery, verdict: ValidationVerdict) -> Self {
        debug_assert!(verdict.is_valid);
        Self { query, verdict }
    }

    pub fn query(&self) -> &GeneratedQuery {
        &self.query
    }

    pub fn verdict(&self) -> &ValidationVerdict {
        &self.verdict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub bytes_projected: u64,
}

/// A validated query whose estimate passed the guardrail. The executor only
/// accepts this type.
#[derive(Debug, Clone)]
pub struct ApprovedQuery {
    query: GeneratedQuery,
    estimate: CostEstimate,
}

impl ApprovedQuery {
    pub(crate) fn new(validated: ValidatedQuery, estimate: CostEstimate) -> Self {
        Self {
            query: validated.query,
            estimate,
        }
    }

    pub fn query(&self) -> &GeneratedQuery {
        &self.query
    }

    pub fn estimate(&self) -> CostEstimate {
        self.estimate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub bytes_processed: u64,
    pub elapsed_ms: u64,
}

/// Final artifact handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: Vec<Row>,
    pub query_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub execution_time_ms: u64,
    pub bytes_processed: u64,
    pub cached: bool,
    pub session_id: String,
}
