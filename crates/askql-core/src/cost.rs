//! Dry-run cost estimation and the bytes-scanned guardrail

use std::sync::Arc;
use std::time::Duration;

use crate::engine::DataEngine;
use crate::error::{ExecutionError, PipelineError};
use crate::model::{ApprovedQuery, CostEstimate, ValidatedQuery};

pub struct CostEstimator {
    engine: Arc<dyn DataEngine>,
    timeout: Duration,
}

impl CostEstimator {
    pub fn new(engine: Arc<dyn DataEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Ask the engine for projected bytes without executing anything.
    pub async fn estimate(&self, query: &ValidatedQuery) -> Result<CostEstimate, ExecutionError> {
        let query_text = &query.query().query_text;
        match tokio::time::timeout(self.timeout, self.engine.estimate(query_text)).await {
            Ok(Ok(bytes_projected)) => Ok(CostEstimate { bytes_projected }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ExecutionError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Flat ceiling on projected bytes. There is no bypass.
#[derive(Debug, Clone, Copy)]
pub struct Guardrail {
    max_bytes: u64,
}

impl Guardrail {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// A projection equal to the ceiling passes.
    pub fn check(
        &self,
        query: ValidatedQuery,
        estimate: CostEstimate,
    ) -> Result<ApprovedQuery, PipelineError> {
        if estimate.bytes_projected > self.max_bytes {
            return Err(PipelineError::CostExceeded {
                projected_bytes: estimate.bytes_projected,
                max_bytes: self.max_bytes,
                suggestion: suggestion(estimate.bytes_projected, self.max_bytes),
            });
        }
        Ok(ApprovedQuery::new(query, estimate))
    }
}

fn suggestion(projected: u64, max: u64) -> String {
    let ratio = projected as f64 / max.max(1) as f64;
    format!(
        "The query would scan {} (limit {}), about {:.1}x the allowed amount. \
         Narrow the date range, add filters on specific values, or ask for fewer columns.",
        human_bytes(projected),
        human_bytes(max),
        ratio
    )
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
