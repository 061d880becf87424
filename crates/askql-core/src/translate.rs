//! Natural language to SQL translation

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TranslationError;
use crate::llm::{
    generate_within, Generation, GenerationParams, GenerationRequest, ResponseSchema,
    TextGenerator,
};
use crate::model::{Complexity, GeneratedQuery};

/// System prompt for the translation call
const SYSTEM_PROMPT: &str = r#"You are an expert analyst who converts natural language questions into a single read-only SQL query for an analytical (DuckDB-compatible) engine.

Rules:
1. Produce exactly ONE SELECT statement (a WITH ... SELECT is fine). Never modify data or schema.
2. Always include a LIMIT clause. Use LIMIT 100 unless the question asks for a specific count.
3. Name the columns you need instead of SELECT * whenever the schema is known.
4. Filter as early as possible. Prefer date ranges and equality filters that narrow the scan.
5. Avoid CROSS JOIN and joins without an ON condition.
6. Do not add comments and do not end the query with a semicolon.

Call the `emit_query` function with:
- query: the SQL text
- explanation: one or two sentences describing what the query returns
- complexity: "low" for single-table filters, "medium" for aggregations or a single join, "high" for multiple joins, window functions or subqueries"#;

const FUNCTION_NAME: &str = "emit_query";

fn response_schema() -> ResponseSchema {
    ResponseSchema {
        name: FUNCTION_NAME.to_string(),
        description: "Return the generated SQL query with a short explanation".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single read-only SQL SELECT statement"
                },
                "explanation": {
                    "type": "string",
                    "description": "What the query returns, in plain language"
                },
                "complexity": {
                    "type": "string",
                    "enum": ["low", "medium", "high"]
                }
            },
            "required": ["query", "explanation", "complexity"],
            "additionalProperties": false
        }),
    }
}

/// Structured payload returned by the model
#[derive(Debug, Deserialize)]
struct TranslationPayload {
    query: String,
    #[serde(default)]
    explanation: String,
    complexity: Complexity,
}

pub struct QueryTranslator {
    llm: Arc<dyn TextGenerator>,
    params: GenerationParams,
    timeout: Duration,
    /// Operator-supplied schema description shared by every request
    schema_context: Option<String>,
}

impl QueryTranslator {
    pub fn new(llm: Arc<dyn TextGenerator>, params: GenerationParams, timeout: Duration) -> Self {
        Self {
            llm,
            params,
            timeout,
            schema_context: None,
        }
    }

    pub fn with_schema_context(mut self, schema_context: Option<String>) -> Self {
        self.schema_context = schema_context;
        self
    }

    /// Translate a question into a candidate query. No retries: the first
    /// unusable response is returned as an error.
    pub async fn translate(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<GeneratedQuery, TranslationError> {
        let request = GenerationRequest {
            system: self.system_prompt(),
            prompt: build_user_prompt(prompt, context),
            params: self.params,
            schema: Some(response_schema()),
        };

        let generation = generate_within(self.llm.as_ref(), request, self.timeout).await?;

        let payload = match generation {
            Generation::Structured(value) => value,
            Generation::Text(text) => {
                tracing::warn!(response = %text, "Translator received free text");
                return Err(TranslationError::MissingPayload);
            }
        };

        parse_payload(payload)
    }

    fn system_prompt(&self) -> String {
        match &self.schema_context {
            Some(catalog) => format!(
                "{}\n\n## Database Catalog\n\nThe following tables are available. Use only these tables and columns:\n\n{}",
                SYSTEM_PROMPT, catalog
            ),
            None => SYSTEM_PROMPT.to_string(),
        }
    }
}

fn build_user_prompt(prompt: &str, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("Context:\n{}\n\nQuestion: {}", context, prompt.trim()),
        None => prompt.trim().to_string(),
    }
}

fn parse_payload(value: serde_json::Value) -> Result<GeneratedQuery, TranslationError> {
    let payload: TranslationPayload = serde_json::from_value(value.clone()).map_err(|e| {
        tracing::warn!(payload = %value, "Failed to parse translation payload: {}", e);
        TranslationError::Malformed(e.to_string())
    })?;

    let query_text = clean_query(&payload.query);
    if query_text.is_empty() {
        return Err(TranslationError::EmptyQuery);
    }

    Ok(GeneratedQuery {
        query_text,
        explanation: payload.explanation.trim().to_string(),
        estimated_complexity: payload.complexity,
    })
}

/// Strip markdown fences and trailing semicolons the model sometimes adds.
fn clean_query(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest
            .strip_prefix("sql")
            .or_else(|| rest.strip_prefix("SQL"))
            .unwrap_or(rest);
        text = rest.strip_suffix("```").unwrap_or(rest).trim();
    }

    text.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}
