//! Anthropic Messages API client.
//!
//! Non-streaming: one request per round trip, the whole response is decoded
//! at once. Tool calls come back as `tool_use` content blocks and are mapped
//! onto the shared [`ToolCall`] type.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    ChatMessage, ChatOptions, ChatResponse, FunctionCall, LlmClient, Role, TokenUsage, ToolCall,
    ToolDefinition,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Connection settings for the Anthropic API.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: API_VERSION.to_string(),
        }
    }

    /// Set the base URL (useful for testing with mock servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// [`LlmClient`] backed by the Anthropic Messages API.
pub struct AnthropicClient {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Build the request body for `POST /v1/messages`.
fn build_request(
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    options: &ChatOptions,
) -> Value {
    let (system, converted) = convert_messages(messages);

    let mut body = json!({
        "model": model,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": converted,
    });

    if let Some(system) = system {
        body["system"] = Value::String(system);
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.function.name,
                        "description": t.function.description,
                        "input_schema": t.function.parameters,
                    })
                })
                .collect(),
        );
    }

    body
}

/// Convert shared chat messages to Anthropic's shape.
///
/// System messages are joined into the top-level `system` field. Tool results
/// become `tool_result` blocks on a user turn, and consecutive turns with the
/// same role are merged so the conversation strictly alternates.
fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg.role {
            Role::System => {
                if let Some(text) = msg.content.as_deref() {
                    system_parts.push(text);
                }
                continue;
            }
            Role::User => {
                let text = msg.content.clone().unwrap_or_default();
                ("user", vec![json!({"type": "text", "text": text})])
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in msg.tool_calls.as_deref().unwrap_or(&[]) {
                    let input: Value =
                        serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function.name,
                        "input": input,
                    }));
                }
                if blocks.is_empty() {
                    continue;
                }
                ("assistant", blocks)
            }
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content.clone().unwrap_or_default(),
                })],
            ),
        };

        match turns.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    let converted = turns
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();

    (system, converted)
}

fn into_chat_response(response: MessagesResponse) -> ChatResponse {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                call_type: "function".to_string(),
                function: FunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::Other => {}
        }
    }

    ChatResponse {
        content: if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        finish_reason: response.stop_reason,
        usage: response
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens)),
        model: response.model,
    }
}

/// Extract a human-readable error message from an Anthropic error response.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no response body".to_string()
            } else {
                body.chars().take(500).collect()
            }
        })
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion_with_options(model, messages, tools, ChatOptions::default())
            .await
    }

    async fn chat_completion_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let body = build_request(model, messages, tools, &options);
        let url = format!("{}/v1/messages", self.config.base_url);

        tracing::debug!(model = %model, messages = messages.len(), "Sending request to Anthropic");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Anthropic request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error ({}): {}", status, extract_error_message(&text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to decode Anthropic response: {}", e))?;

        Ok(into_chat_response(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FunctionDefinition;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: args.to_string(),
            },
        }
    }

    #[test]
    fn test_convert_extracts_system_and_merges_tool_results() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("check logs"),
            ChatMessage::assistant_tool_calls(
                None,
                vec![call("t1", "get_server_logs", r#"{"hours":2}"#), call("t2", "post_discord_alert", "not json")],
            ),
            ChatMessage::tool_result("t1", "[ts] line"),
            ChatMessage::tool_result("t2", "posted"),
            ChatMessage::assistant("all good"),
        ];

        let (system, converted) = convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(converted.len(), 4);

        assert_eq!(converted[1]["role"], "assistant");
        assert_eq!(converted[1]["content"][0]["type"], "tool_use");
        assert_eq!(converted[1]["content"][0]["input"]["hours"], 2);
        assert_eq!(converted[1]["content"][1]["input"], json!({}));

        assert_eq!(converted[2]["role"], "user");
        let results = converted[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "t1");
        assert_eq!(results[1]["tool_use_id"], "t2");

        assert_eq!(converted[3]["content"][0]["text"], "all good");
    }

    #[test]
    fn test_build_request_includes_tools_and_max_tokens() {
        let tools = vec![ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "save_report_html".to_string(),
                description: "save".to_string(),
                parameters: json!({"type": "object"}),
            },
        }];
        let options = ChatOptions {
            max_tokens: Some(1234),
            ..Default::default()
        };

        let body = build_request("claude-test", &[ChatMessage::user("hi")], Some(&tools), &options);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 1234);
        assert_eq!(body["tools"][0]["name"], "save_report_html");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_extract_error_message() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(extract_error_message(body), "Overloaded");
        assert_eq!(extract_error_message(""), "no response body");
        assert_eq!(extract_error_message("plain"), "plain");
    }

    #[tokio::test]
    async fn test_chat_completion_decodes_tool_use_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude-test",
                "stop_reason": "tool_use",
                "content": [
                    {"type": "text", "text": "Fetching logs."},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_server_logs", "input": {"hours": 24}}
                ],
                "usage": {"input_tokens": 120, "output_tokens": 30}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(AnthropicConfig::new("sk-test").with_base_url(server.uri()));
        let response = client
            .chat_completion("claude-test", &[ChatMessage::user("go")], None)
            .await
            .unwrap();

        assert_eq!(response.content.as_deref(), Some("Fetching logs."));
        assert_eq!(response.requested_tools().len(), 1);
        assert_eq!(response.requested_tools()[0].function.name, "get_server_logs");
        assert_eq!(response.requested_tools()[0].function.arguments, r#"{"hours":24}"#);
        assert_eq!(response.usage, Some(TokenUsage::new(120, 30)));
        assert_eq!(response.finish_reason.as_deref(), Some("tool_use"));
    }

    #[tokio::test]
    async fn test_chat_completion_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(AnthropicConfig::new("sk-test").with_base_url(server.uri()));
        let err = client
            .chat_completion("claude-test", &[ChatMessage::user("go")], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }
}
