//! Stub collaborators that count how often each capability is used

use askql_core::error::LlmError;
use askql_core::{
    DataEngine, ExecutionError, ExecutionResult, Generation, GenerationRequest, Row,
    TextGenerator,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const VACANT_QUERY: &str = "SELECT * FROM units WHERE status='vacant' LIMIT 100";

pub struct StubLlm {
    pub query: String,
    /// Replaces the well-formed translation reply when set
    pub translation: Option<Generation>,
    /// Reply for `review_query`; `None` makes the call fail
    pub verdict: Option<serde_json::Value>,
    /// Reply for narration; `None` makes the call fail
    pub narration: Option<String>,
    pub narrate_delay: Duration,
    /// User prompts sent for translation
    pub translate_prompts: Mutex<Vec<String>>,
    pub translate_calls: AtomicUsize,
    pub review_calls: AtomicUsize,
    pub narrate_calls: AtomicUsize,
}

impl StubLlm {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            translation: None,
            verdict: Some(json!({"is_valid": true, "issues": [], "suggestions": []})),
            narration: Some("There are 2 vacant units.".to_string()),
            narrate_delay: Duration::ZERO,
            translate_prompts: Mutex::new(Vec::new()),
            translate_calls: AtomicUsize::new(0),
            review_calls: AtomicUsize::new(0),
            narrate_calls: AtomicUsize::new(0),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
            + self.review_calls.load(Ordering::SeqCst)
            + self.narrate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for StubLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, LlmError> {
        match request.schema.as_ref().map(|s| s.name.as_str()) {
            Some("emit_query") => {
                self.translate_calls.fetch_add(1, Ordering::SeqCst);
                self.translate_prompts.lock().unwrap().push(request.prompt.clone());
                if let Some(reply) = &self.translation {
                    return Ok(reply.clone());
                }
                Ok(Generation::Structured(json!({
                    "query": self.query,
                    "explanation": "Lists vacant units",
                    "complexity": "low"
                })))
            }
            Some("review_query") => {
                self.review_calls.fetch_add(1, Ordering::SeqCst);
                self.verdict
                    .clone()
                    .map(Generation::Structured)
                    .ok_or_else(|| LlmError::Request("reviewer unavailable".to_string()))
            }
            Some(other) => panic!("unexpected schema {other}"),
            None => {
                self.narrate_calls.fetch_add(1, Ordering::SeqCst);
                if !self.narrate_delay.is_zero() {
                    tokio::time::sleep(self.narrate_delay).await;
                }
                self.narration
                    .clone()
                    .map(Generation::Text)
                    .ok_or_else(|| LlmError::Request("narrator unavailable".to_string()))
            }
        }
    }
}

pub struct StubEngine {
    pub bytes_projected: u64,
    pub rows: Vec<Row>,
    pub execute_delay: Duration,
    pub fail_execute: bool,
    pub estimate_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
}

impl StubEngine {
    pub fn new(bytes_projected: u64) -> Self {
        Self {
            bytes_projected,
            rows: vacant_rows(),
            execute_delay: Duration::ZERO,
            fail_execute: false,
            estimate_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
        }
    }

    pub fn estimates(&self) -> usize {
        self.estimate_calls.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataEngine for StubEngine {
    async fn estimate(&self, _query: &str) -> Result<u64, ExecutionError> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bytes_projected)
    }

    async fn execute(
        &self,
        _query: &str,
        row_cap: usize,
        _timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        if !self.execute_delay.is_zero() {
            tokio::time::sleep(self.execute_delay).await;
        }
        if self.fail_execute {
            return Err(ExecutionError::Engine("connection refused".to_string()));
        }
        Ok(ExecutionResult {
            rows: self.rows.iter().take(row_cap).cloned().collect(),
            bytes_processed: 1024,
            elapsed_ms: 7,
        })
    }
}

pub fn vacant_rows() -> Vec<Row> {
    ["A-101", "B-204"]
        .iter()
        .map(|unit| {
            let mut row = Row::new();
            row.insert("unit".to_string(), json!(unit));
            row.insert("status".to_string(), json!("vacant"));
            row
        })
        .collect()
}
