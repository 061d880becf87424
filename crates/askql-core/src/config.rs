//! Tunables for the pipeline, injected into the orchestrator at construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::llm::GenerationParams;

/// 500 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 500 * 1024 * 1024;
pub const DEFAULT_ROW_CAP: usize = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid pipeline setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// How candidate queries are checked before costing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Static SQL checks only
    #[default]
    Heuristic,
    /// Second model call, combined with the blocking static checks
    Model,
}

impl std::str::FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "heuristic" => Ok(ValidationMode::Heuristic),
            "model" | "llm" => Ok(ValidationMode::Model),
            other => Err(format!("unknown validation mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Guardrail ceiling on projected bytes scanned
    pub max_bytes: u64,
    pub row_cap: usize,
    pub execution_timeout_ms: u64,
    pub estimate_timeout_ms: u64,
    /// Applies to each text-generation round trip
    pub llm_timeout_ms: u64,
    /// Deadline for the whole pipeline
    pub request_timeout_ms: u64,
    pub include_explanation: bool,
    pub validation_mode: ValidationMode,
    /// Rows shown to the narrator
    pub narration_max_rows: usize,
    pub translation: GenerationParams,
    pub validation: GenerationParams,
    pub narration: GenerationParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            row_cap: DEFAULT_ROW_CAP,
            execution_timeout_ms: 30_000,
            estimate_timeout_ms: 10_000,
            llm_timeout_ms: 20_000,
            request_timeout_ms: 90_000,
            include_explanation: true,
            validation_mode: ValidationMode::Heuristic,
            narration_max_rows: 50,
            translation: GenerationParams::new(0.1, 1024),
            validation: GenerationParams::new(0.0, 512),
            narration: GenerationParams::new(0.3, 512),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.row_cap == 0 {
            return Err(ConfigError::Invalid {
                field: "row_cap",
                reason: "must be greater than zero".to_string(),
            });
        }
        let timeouts = [
            ("execution_timeout_ms", self.execution_timeout_ms),
            ("estimate_timeout_ms", self.estimate_timeout_ms),
            ("llm_timeout_ms", self.llm_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn estimate_timeout(&self) -> Duration {
        Duration::from_millis(self.estimate_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_bytes, 524_288_000);
        assert_eq!(config.row_cap, 1000);
        assert_eq!(config.execution_timeout(), Duration::from_secs(30));
        assert_eq!(config.validation_mode, ValidationMode::Heuristic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"max_bytes": 1000, "validation_mode": "model"}"#).unwrap();
        assert_eq!(config.max_bytes, 1000);
        assert_eq!(config.row_cap, 1000);
        assert_eq!(config.validation_mode, ValidationMode::Model);
    }

    #[test]
    fn test_zero_row_cap_rejected() {
        let config = PipelineConfig {
            row_cap: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "row_cap", .. })
        ));
    }

    #[test]
    fn test_validation_mode_parse() {
        assert_eq!("LLM".parse::<ValidationMode>(), Ok(ValidationMode::Model));
        assert!("strict".parse::<ValidationMode>().is_err());
    }
}
