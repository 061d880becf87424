//! AskQL core - cost-guarded natural language to SQL pipeline
//!
//! Turns a free-text question into a query, validates it, estimates its
//! scan cost with a dry run, refuses anything over the configured ceiling,
//! executes it under a row cap and timeout, and optionally narrates the
//! result. The text-generation service and the data engine are consumed
//! through the [`TextGenerator`] and [`DataEngine`] traits.

mod macros;

pub mod config;
pub mod cost;
pub mod engine;
pub mod error;
pub mod execute;
pub mod llm;
pub mod model;
pub mod narrate;
pub mod pipeline;
pub mod translate;
pub mod validate;

pub use config::{PipelineConfig, ValidationMode};
pub use engine::DataEngine;
pub use error::{ErrorReport, ExecutionError, PipelineError};
pub use llm::{Generation, GenerationParams, GenerationRequest, ResponseSchema, TextGenerator};
pub use model::{
    Complexity, CostEstimate, ExecutionResult, GeneratedQuery, QueryRequest, QueryResponse, Row,
    ValidationVerdict,
};
pub use pipeline::Orchestrator;
