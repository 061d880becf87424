//! Capped, time-limited execution of approved queries

use std::sync::Arc;
use std::time::Duration;

use crate::engine::DataEngine;
use crate::error::ExecutionError;
use crate::model::{ApprovedQuery, ExecutionResult};

pub struct QueryExecutor {
    engine: Arc<dyn DataEngine>,
    row_cap: usize,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(engine: Arc<dyn DataEngine>, row_cap: usize, timeout: Duration) -> Self {
        Self {
            engine,
            row_cap,
            timeout,
        }
    }

    /// Execute once. No retries.
    pub async fn execute(&self, query: &ApprovedQuery) -> Result<ExecutionResult, ExecutionError> {
        let query_text = &query.query().query_text;
        let timeout_ms = self.timeout.as_millis() as u64;

        // The engine enforces the timeout too; this bounds engines that don't.
        let mut result = match tokio::time::timeout(
            self.timeout,
            self.engine.execute(query_text, self.row_cap, self.timeout),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ExecutionError::Timeout { timeout_ms }),
        };

        if result.rows.len() > self.row_cap {
            tracing::warn!(
                returned = result.rows.len(),
                row_cap = self.row_cap,
                "Engine ignored the row cap, truncating"
            );
            result.rows.truncate(self.row_cap);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::Guardrail;
    use crate::model::{
        Complexity, CostEstimate, GeneratedQuery, Row, ValidatedQuery, ValidationVerdict,
    };
    use async_trait::async_trait;

    struct Flood(usize);

    #[async_trait]
    impl DataEngine for Flood {
        async fn estimate(&self, _query: &str) -> Result<u64, ExecutionError> {
            Ok(0)
        }

        async fn execute(
            &self,
            _query: &str,
            _row_cap: usize,
            _timeout: Duration,
        ) -> Result<ExecutionResult, ExecutionError> {
            let rows = (0..self.0)
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("id".to_string(), serde_json::json!(i));
                    row
                })
                .collect();
            Ok(ExecutionResult {
                rows,
                bytes_processed: 8 * self.0 as u64,
                elapsed_ms: 1,
            })
        }
    }

    fn approved() -> ApprovedQuery {
        let validated = ValidatedQuery::new(
            GeneratedQuery {
                query_text: "SELECT id FROM units LIMIT 10".to_string(),
                explanation: String::new(),
                estimated_complexity: Complexity::Low,
            },
            ValidationVerdict::valid(),
        );
        Guardrail::new(u64::MAX)
            .check(validated, CostEstimate { bytes_projected: 0 })
            .unwrap()
    }

    #[tokio::test]
    async fn test_row_cap_enforced() {
        let executor = QueryExecutor::new(Arc::new(Flood(25)), 10, Duration::from_secs(1));
        let result = executor.execute(&approved()).await.unwrap();
        assert_eq!(result.rows.len(), 10);
        assert_eq!(result.bytes_processed, 200);
    }
}
