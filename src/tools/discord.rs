//! Admin alerts posted to a Discord channel webhook.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext};

/// Discord rejects message content longer than this.
const DISCORD_MESSAGE_LIMIT: usize = 2000;

#[derive(Debug, Clone, Default)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
}

impl DiscordConfig {
    pub fn from_env() -> Self {
        Self {
            webhook_url: std::env::var("DISCORD_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

/// `post_discord_alert`: notify admins about something that needs attention.
pub struct DiscordAlert {
    config: DiscordConfig,
    client: reqwest::Client,
}

impl DiscordAlert {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

/// Split `message` into chunks of at most `limit` characters, breaking on
/// newlines where one is available.
fn split_message(message: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = message;

    while rest.chars().count() > limit {
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..hard_end];
        let cut = match window.rfind('\n') {
            Some(i) if i > 0 => i,
            _ => hard_end,
        };
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].strip_prefix('\n').unwrap_or(&rest[cut..]);
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

#[async_trait]
impl Tool for DiscordAlert {
    fn name(&self) -> &str {
        "post_discord_alert"
    }

    fn description(&self) -> &str {
        "Post a message to the server admin Discord channel. Use it for status updates and for \
         issues needing attention: cheating, technical problems, rule violations."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Alert text; keep it concise and actionable"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing required argument: message"))?;
        let webhook_url = self
            .config
            .webhook_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DISCORD_WEBHOOK_URL environment variable not set"))?;

        let chunks = split_message(message, DISCORD_MESSAGE_LIMIT);
        for (i, chunk) in chunks.iter().enumerate() {
            let response = self
                .client
                .post(webhook_url)
                .json(&json!({ "content": chunk }))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!(
                    "Failed to post to Discord (part {}/{}): {} - {}",
                    i + 1,
                    chunks.len(),
                    status.as_u16(),
                    body
                );
            }
        }

        tracing::info!(agent = %ctx.agent, parts = chunks.len(), "Posted Discord alert");
        Ok("Alert posted to Discord successfully".to_string())
    }
}
