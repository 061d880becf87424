//! Best-effort natural-language summary of executed results

use std::sync::Arc;
use std::time::Duration;

use crate::error::NarrationError;
use crate::llm::{generate_within, Generation, GenerationParams, GenerationRequest, TextGenerator};
use crate::model::Row;

const NARRATION_PROMPT: &str = "You explain query results to a non-technical operator. \
Answer the question directly in two to four sentences using only the rows provided. \
Mention concrete numbers. Do not describe the SQL and do not invent data that is not in the rows.";

pub struct Narrator {
    llm: Arc<dyn TextGenerator>,
    params: GenerationParams,
    timeout: Duration,
    max_rows: usize,
}

impl Narrator {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        params: GenerationParams,
        timeout: Duration,
        max_rows: usize,
    ) -> Self {
        Self {
            llm,
            params,
            timeout,
            max_rows,
        }
    }

    pub async fn narrate(
        &self,
        question: &str,
        query_text: &str,
        rows: &[Row],
    ) -> Result<String, NarrationError> {
        let request = GenerationRequest {
            system: NARRATION_PROMPT.to_string(),
            prompt: self.render(question, query_text, rows)?,
            params: self.params,
            schema: None,
        };

        let text = match generate_within(self.llm.as_ref(), request, self.timeout).await? {
            Generation::Text(text) => text,
            // Free-text mode was asked for; accept a bare string payload anyway.
            Generation::Structured(serde_json::Value::String(text)) => text,
            Generation::Structured(_) => return Err(NarrationError::Empty),
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(NarrationError::Empty);
        }
        Ok(text.to_string())
    }

    fn render(&self, question: &str, query_text: &str, rows: &[Row]) -> Result<String, NarrationError> {
        let shown = &rows[..rows.len().min(self.max_rows)];
        let mut prompt = format!(
            "Question: {}\n\nQuery:\n{}\n\nResults ({} rows",
            question.trim(),
            query_text,
            rows.len()
        );
        if shown.len() < rows.len() {
            prompt.push_str(&format!(", first {} shown", shown.len()));
        }
        prompt.push_str("):\n");
        for row in shown {
            prompt.push_str(&serde_json::to_string(row)?);
            prompt.push('\n');
        }
        Ok(prompt)
    }
}
