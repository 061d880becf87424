//! OpenAI-backed text generation

use askql_core::error::LlmError;
use askql_core::{Generation, GenerationRequest, TextGenerator};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionNamedToolChoice, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionToolArgs, ChatCompletionToolChoiceOption, ChatCompletionToolType,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, FunctionName,
        FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;

pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn build_request(
        &self,
        request: &GenerationRequest,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.system.clone())
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(request.prompt.clone())
                    .build()?,
            ),
        ];

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(self.model.clone())
            .messages(messages)
            .temperature(request.params.temperature)
            .max_completion_tokens(request.params.max_tokens);

        if let Some(schema) = &request.schema {
            // Function-style structured output: one tool, and the model must call it.
            let tool = ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(
                    FunctionObjectArgs::default()
                        .name(schema.name.clone())
                        .description(schema.description.clone())
                        .parameters(schema.parameters.clone())
                        .build()?,
                )
                .build()?;
            builder
                .tools(vec![tool])
                .tool_choice(ChatCompletionToolChoiceOption::Named(
                    ChatCompletionNamedToolChoice {
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionName {
                            name: schema.name.clone(),
                        },
                    },
                ));
        }

        builder.build()
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, LlmError> {
        let chat_request = self
            .build_request(&request)
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)?;

        if request.schema.is_some() {
            if let Some(call) = message.tool_calls.and_then(|calls| calls.into_iter().next()) {
                tracing::debug!(function = %call.function.name, "LLM tool call received");
                return Ok(parse_arguments(&call.function.arguments));
            }
        }

        let content = message.content.ok_or(LlmError::EmptyResponse)?;
        tracing::debug!("LLM Response: {}", content);

        if request.schema.is_some() {
            // Some models answer in plain content even when a tool is forced.
            if let Some(value) = structured_from_content(&content) {
                return Ok(Generation::Structured(value));
            }
        }
        Ok(Generation::Text(content))
    }
}

/// Arguments that aren't JSON are passed on as a string so the caller can
/// report the payload as malformed.
fn parse_arguments(arguments: &str) -> Generation {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(value) => Generation::Structured(value),
        Err(e) => {
            tracing::warn!("Tool call arguments were not JSON: {}", e);
            Generation::Structured(serde_json::Value::String(arguments.to_string()))
        }
    }
}

/// Parse a JSON object out of free text, tolerating markdown fences.
fn structured_from_content(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);

    serde_json::from_str::<serde_json::Value>(body.trim())
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use askql_core::{GenerationParams, ResponseSchema};
    use serde_json::json;

    #[test]
    fn test_structured_from_content() {
        assert_eq!(
            structured_from_content("```json\n{\"query\": \"SELECT 1\"}\n```"),
            Some(json!({"query": "SELECT 1"}))
        );
        assert_eq!(
            structured_from_content("{\"is_valid\": true}"),
            Some(json!({"is_valid": true}))
        );
        assert_eq!(structured_from_content("There are 3 units."), None);
        assert_eq!(structured_from_content("[1, 2]"), None);
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            parse_arguments("{\"query\": \"SELECT 1\"}"),
            Generation::Structured(json!({"query": "SELECT 1"}))
        );
        assert_eq!(
            parse_arguments("not json"),
            Generation::Structured(json!("not json"))
        );
    }

    #[test]
    fn test_build_request_forces_tool() {
        let generator = OpenAiGenerator::new(
            Client::with_config(OpenAIConfig::new().with_api_key("test")),
            "gpt-4o-mini",
        );
        let request = GenerationRequest {
            system: "system".to_string(),
            prompt: "show vacant units".to_string(),
            params: GenerationParams::new(0.1, 256),
            schema: Some(ResponseSchema {
                name: "emit_query".to_string(),
                description: "Return SQL".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }),
        };

        let built = generator.build_request(&request).unwrap();
        assert_eq!(built.model, "gpt-4o-mini");
        assert_eq!(built.temperature, Some(0.1));
        assert_eq!(built.tools.as_ref().map(Vec::len), Some(1));
        assert!(built.tool_choice.is_some());

        let free_text = GenerationRequest {
            schema: None,
            ..request
        };
        let built = generator.build_request(&free_text).unwrap();
        assert!(built.tools.is_none());
    }
}
