//! MCP (Model Context Protocol) server implementation

use askql_core::{Orchestrator, PipelineError, QueryRequest, QueryResponse};
use askql_duck::DuckEngine;
use async_trait::async_trait;
use rust_mcp_schema::{
    schema_utils::CallToolError, CallToolRequest, CallToolResult, ContentBlock, Implementation,
    InitializeResult, ListToolsRequest, ListToolsResult, RpcError, ServerCapabilities,
    ServerCapabilitiesTools, TextContent, Tool, ToolInputSchema, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::{mcp_server::ServerHandler, McpServer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::catalog::DatabaseCatalog;
use crate::metrics::Metrics;

/// AskQL MCP Server Handler
pub struct AskqlServerHandler {
    orchestrator: Arc<Orchestrator>,
    engine: Arc<DuckEngine>,
    database_path: String,
    metrics: Arc<Metrics>,
}

impl AskqlServerHandler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        engine: Arc<DuckEngine>,
        database_path: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            orchestrator,
            engine,
            database_path,
            metrics,
        }
    }

    /// Create server initialization details
    pub fn server_info() -> InitializeResult {
        InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "askql-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("AskQL cost-guarded natural language queries".to_string()),
            },
            instructions: Some(
                "AskQL Server - ask questions about the dataset in plain language. \
                 Use the 'query' tool; queries that would scan too much data are refused \
                 with suggestions for narrowing them."
                    .to_string(),
            ),
            meta: None,
        }
    }

    /// Define available MCP tools
    fn tools() -> Vec<Tool> {
        let mut tools = Vec::new();

        // Query tool
        {
            let mut properties = HashMap::new();
            properties.insert(
                "prompt".to_string(),
                string_property("Question about the data (3-500 characters), e.g. 'show vacant units'"),
            );
            properties.insert(
                "session_id".to_string(),
                string_property("Caller session identifier, echoed back in the response"),
            );
            properties.insert(
                "context".to_string(),
                string_property("Optional prior context to help interpret the question"),
            );

            let mut explain_prop = Map::new();
            explain_prop.insert("type".to_string(), Value::String("boolean".to_string()));
            explain_prop.insert(
                "description".to_string(),
                Value::String("Include a plain-language explanation of the results".to_string()),
            );
            properties.insert("include_explanation".to_string(), explain_prop);

            tools.push(Tool {
                name: "query".to_string(),
                description: Some(
                    "Answer a natural language question against the database. \
                     The question is translated to SQL, validated, cost-checked and executed \
                     with a row cap. Returns rows, the SQL, bytes processed and an optional explanation."
                        .to_string(),
                ),
                input_schema: ToolInputSchema::new(vec!["prompt".to_string()], Some(properties)),
                title: None,
                annotations: None,
                meta: None,
                output_schema: None,
            });
        }

        // Catalog tool
        tools.push(Tool {
            name: "catalog".to_string(),
            description: Some(
                "Get database catalog information: tables, column types, row counts and \
                 sample rows, in JSONL format with one table per line."
                    .to_string(),
            ),
            input_schema: ToolInputSchema::new(vec![], None),
            title: None,
            annotations: None,
            meta: None,
            output_schema: None,
        });

        // Metrics tool
        tools.push(Tool {
            name: "metrics".to_string(),
            description: Some("Prometheus metrics for query requests".to_string()),
            input_schema: ToolInputSchema::new(vec![], None),
            title: None,
            annotations: None,
            meta: None,
            output_schema: None,
        });

        tools
    }
}

fn string_property(description: &str) -> Map<String, Value> {
    let mut prop = Map::new();
    prop.insert("type".to_string(), Value::String("string".to_string()));
    prop.insert("description".to_string(), Value::String(description.to_string()));
    prop
}

#[async_trait]
impl ServerHandler for AskqlServerHandler {
    async fn handle_list_tools_request(
        &self,
        _request: ListToolsRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        info!("Listing available tools");

        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        request: CallToolRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        info!("Tool called: {}", request.params.name);

        match request.params.name.as_str() {
            "query" => self.handle_query_tool(request.params.arguments.map(Value::Object)).await,
            "catalog" => self.handle_catalog_tool().await,
            "metrics" => self.handle_metrics_tool(),
            _ => Err(CallToolError::unknown_tool(request.params.name.clone())),
        }
    }
}

impl AskqlServerHandler {
    async fn handle_query_tool(
        &self,
        arguments: Option<Value>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let request = parse_query_args(arguments).map_err(CallToolError::from_message)?;

        let started = Instant::now();
        let outcome = self.orchestrator.run_query(request).await;

        let label = match &outcome {
            Ok(_) => "completed",
            Err(e) => e.kind(),
        };
        self.metrics.observe(label, started.elapsed());

        render_outcome(&outcome).map_err(|e| {
            error!("Failed to serialize query outcome: {}", e);
            CallToolError::from_message(format!("Failed to serialize query outcome: {}", e))
        })
    }

    async fn handle_catalog_tool(&self) -> std::result::Result<CallToolResult, CallToolError> {
        info!("Extracting catalog from database: {}", self.database_path);

        let conn = self.engine.clone_connection().map_err(|e| {
            error!("Failed to open catalog connection: {}", e);
            CallToolError::from_message(format!("Failed to extract catalog: {}", e))
        })?;
        let database_path = self.database_path.clone();

        let catalog = tokio::task::spawn_blocking(move || {
            DatabaseCatalog::from_connection(&conn, &database_path)
        })
        .await
        .map_err(|e| CallToolError::from_message(format!("Catalog task failed: {}", e)))?
        .map_err(|e| {
            error!("Failed to extract catalog: {}", e);
            CallToolError::from_message(format!("Failed to extract catalog: {}", e))
        })?;

        let jsonl_output = catalog.to_jsonl().map_err(|e| {
            error!("Failed to serialize catalog: {}", e);
            CallToolError::from_message(format!("Failed to serialize catalog: {}", e))
        })?;

        let summary = format!(
            "Database Catalog: {} tables\n\nTables: {}\n\nJSONL Output:\n{}",
            catalog.tables.len(),
            catalog.table_names().join(", "),
            jsonl_output
        );

        Ok(text_result(summary, false))
    }

    fn handle_metrics_tool(&self) -> std::result::Result<CallToolResult, CallToolError> {
        let text = self
            .metrics
            .render()
            .map_err(|e| CallToolError::from_message(format!("Failed to render metrics: {}", e)))?;
        Ok(text_result(text, false))
    }
}

/// Turn tool arguments into a pipeline request. Prompt length is left to the
/// pipeline so the rejection is reported like every other one.
fn parse_query_args(arguments: Option<Value>) -> Result<QueryRequest, String> {
    let args = arguments.ok_or_else(|| "Missing arguments".to_string())?;

    let prompt = args
        .get("prompt")
        .and_then(Value::as_str)
        .ok_or_else(|| "Missing required argument: prompt".to_string())?;

    let mut request = QueryRequest::new(prompt);
    request.session_id = args
        .get("session_id")
        .and_then(Value::as_str)
        .map(String::from);
    request.context = args.get("context").and_then(Value::as_str).map(String::from);
    request.include_explanation = match args.get("include_explanation") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            return Err(format!(
                "include_explanation must be a boolean, got {}",
                other
            ))
        }
    };

    Ok(request)
}

/// Successful runs return the response JSON; failures return the error
/// report with `is_error` set.
fn render_outcome(
    outcome: &Result<QueryResponse, PipelineError>,
) -> Result<CallToolResult, serde_json::Error> {
    Ok(match outcome {
        Ok(response) => text_result(serde_json::to_string_pretty(response)?, false),
        Err(e) => text_result(serde_json::to_string_pretty(&e.report())?, true),
    })
}

fn text_result(text: String, is_error: bool) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(text, None, None))],
        is_error: is_error.then_some(true),
        meta: None,
        structured_content: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_query_args() {
        let request = parse_query_args(Some(json!({
            "prompt": "show vacant units",
            "session_id": "s-1",
            "include_explanation": false
        })))
        .unwrap();
        assert_eq!(request.prompt, "show vacant units");
        assert_eq!(request.session_id.as_deref(), Some("s-1"));
        assert_eq!(request.include_explanation, Some(false));
        assert!(request.context.is_none());

        let request = parse_query_args(Some(json!({"prompt": "show vacant units"}))).unwrap();
        assert_eq!(request.include_explanation, None);
    }

    #[test]
    fn test_parse_query_args_errors() {
        assert!(parse_query_args(None).is_err());
        assert!(parse_query_args(Some(json!({"session_id": "s"}))).is_err());
        assert!(parse_query_args(Some(json!({
            "prompt": "show vacant units",
            "include_explanation": "yes"
        })))
        .is_err());
    }

    #[test]
    fn test_render_cost_exceeded() {
        let outcome: Result<QueryResponse, PipelineError> = Err(PipelineError::CostExceeded {
            projected_bytes: 2_000_000_000,
            max_bytes: 500_000_000,
            suggestion: "Add filters".to_string(),
        });
        let result = render_outcome(&outcome).unwrap();
        assert_eq!(result.is_error, Some(true));
        match &result.content[0] {
            ContentBlock::TextContent(text) => {
                let body: Value = serde_json::from_str(&text.text).unwrap();
                assert_eq!(body["kind"], "cost_exceeded");
                assert_eq!(body["projected_bytes"], 2_000_000_000u64);
                assert_eq!(body["max_bytes"], 500_000_000u64);
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[test]
    fn test_tools_listed() {
        let names: Vec<String> = AskqlServerHandler::tools()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["query", "catalog", "metrics"]);
    }
}
