//! Data engine capability: dry-run estimate and capped execution.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ExecutionError;
use crate::model::ExecutionResult;

#[async_trait]
pub trait DataEngine: Send + Sync {
    /// Projected bytes scanned. Must not execute or materialize the query.
    async fn estimate(&self, query: &str) -> Result<u64, ExecutionError>;

    /// Run the query, returning at most `row_cap` rows.
    async fn execute(
        &self,
        query: &str,
        row_cap: usize,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError>;
}
