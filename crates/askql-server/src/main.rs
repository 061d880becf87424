//! AskQL MCP Server
//!
//! Model Context Protocol server that answers natural language questions
//! against DuckDB. Questions are translated to SQL with OpenAI, validated,
//! checked against a scan-size ceiling and only then executed.

use askql_core::Orchestrator;
use askql_duck::DuckEngine;
use rust_mcp_sdk::mcp_server::{hyper_server, HyperServerOptions};
use std::sync::Arc;
use tracing::{info, warn};

mod catalog;
mod config;
mod llm;
mod logging;
mod mcp;
mod metrics;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("ASKQL_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = config::Config::load_or_default(&config_path)?;

    logging::init(&config.logging);
    info!(config = %config_path, "Configuration loaded");

    let api_key = config::Config::get_openai_api_key()?;
    info!("Using OpenAI model: {}", config.llm.model);

    let mut openai_config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
    if let Some(base) = &config.llm.api_base {
        openai_config = openai_config.with_api_base(base.clone());
    }
    let generator = llm::OpenAiGenerator::new(
        async_openai::Client::with_config(openai_config),
        config.llm.model.clone(),
    );

    info!("Opening database: {}", config.database.path);
    let engine = Arc::new(DuckEngine::open(&config.database.path)?);

    let schema_context = if config.database.include_catalog {
        let conn = engine.clone_connection()?;
        match catalog::DatabaseCatalog::from_connection(&conn, &config.database.path) {
            Ok(catalog) => {
                info!(tables = catalog.tables.len(), "Catalog loaded as schema context");
                Some(catalog.to_jsonl()?)
            }
            Err(e) => {
                warn!("Catalog unavailable, translating without schema context: {}", e);
                None
            }
        }
    } else {
        None
    };

    info!(
        max_bytes = config.pipeline.max_bytes,
        row_cap = config.pipeline.row_cap,
        validation_mode = ?config.pipeline.validation_mode,
        "Pipeline limits"
    );

    let orchestrator = Orchestrator::new(config.pipeline.clone(), Arc::new(generator), engine.clone())?
        .with_schema_context(schema_context);

    let handler = mcp::AskqlServerHandler::new(
        Arc::new(orchestrator),
        engine,
        config.database.path.clone(),
        Arc::new(metrics::Metrics::new()?),
    );
    let server_info = mcp::AskqlServerHandler::server_info();

    info!("Starting AskQL MCP server on {}:{}", config.server.host, config.server.port);
    info!("Protocol: MCP with SSE (Server-Sent Events) support");

    let server = hyper_server::create_server(
        server_info,
        handler,
        HyperServerOptions {
            host: config.server.host.clone(),
            port: config.server.port,
            sse_support: true,
            ..Default::default()
        },
    );

    server.start().await?;

    Ok(())
}
