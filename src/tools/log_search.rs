//! Server log retrieval from OpenSearch.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Tool, ToolContext};

const DEFAULT_PORT: &str = "9200";
const DEFAULT_RESULT_SIZE: u64 = 10_000;

/// OpenSearch connection settings. Every field is optional at startup; the
/// tool reports what is missing when the model calls it.
#[derive(Debug, Clone, Default)]
pub struct LogSearchConfig {
    pub host: Option<String>,
    pub port: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub index: Option<String>,
    pub result_size: u64,
}

impl LogSearchConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            host: var("OPENSEARCH_HOST"),
            port: var("OPENSEARCH_PORT").unwrap_or_else(|| DEFAULT_PORT.to_string()),
            user: var("OPENSEARCH_USER"),
            password: var("OPENSEARCH_PASSWORD"),
            index: var("OPENSEARCH_INDEX"),
            result_size: var("OPENSEARCH_RESULT_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RESULT_SIZE),
        }
    }

    /// Search endpoint, e.g. `http://host:9200/index/_search`.
    fn search_url(&self) -> anyhow::Result<url::Url> {
        let (Some(host), Some(index)) = (&self.host, &self.index) else {
            anyhow::bail!(
                "OPENSEARCH_HOST, OPENSEARCH_USER, OPENSEARCH_PASSWORD, and OPENSEARCH_INDEX must be set"
            );
        };
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}/", host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}/", host, self.port)
        };
        let url = url::Url::parse(&base)?.join(&format!("{}/_search", index))?;
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Hits,
}

#[derive(Debug, Default, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source", default)]
    source: Value,
}

/// `get_server_logs`: recent game-server log lines, newest first.
///
/// "Team"/"Global" entries are player chat; everything else is a server
/// event (kills, connections, raids, admin actions, ...).
pub struct LogSearch {
    config: LogSearchConfig,
    client: reqwest::Client,
}

impl LogSearch {
    pub fn new(config: LogSearchConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

fn build_query(hours: u64, size: u64) -> Value {
    json!({
        "query": {
            "range": {
                "@timestamp": {
                    "gte": format!("now-{}h", hours),
                    "lte": "now"
                }
            }
        },
        "sort": [{"@timestamp": {"order": "desc"}}],
        "size": size
    })
}

fn format_hits(hits: &[Hit]) -> String {
    if hits.is_empty() {
        return "No logs found in the specified time range.".to_string();
    }
    hits.iter()
        .map(|hit| {
            let timestamp = hit
                .source
                .get("@timestamp")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let log = hit.source.get("log").and_then(Value::as_str).unwrap_or("");
            format!("[{}] {}", timestamp, log)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for LogSearch {
    fn name(&self) -> &str {
        "get_server_logs"
    }

    fn description(&self) -> &str {
        "Fetch game server logs from OpenSearch. \"Team\" and \"Global\" entries are player chat; \
         all other entries are server events (kills, connections, raids, admin actions). \
         Returns one line per entry as [timestamp] message, newest first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "hours": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Number of hours to look back (defaults to the agent's lookback period)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let hours = args
            .get("hours")
            .and_then(Value::as_u64)
            .filter(|h| *h > 0)
            .unwrap_or(ctx.period_hours);

        let url = self.config.search_url()?;
        let (Some(user), Some(password)) = (&self.config.user, &self.config.password) else {
            anyhow::bail!(
                "OPENSEARCH_HOST, OPENSEARCH_USER, OPENSEARCH_PASSWORD, and OPENSEARCH_INDEX must be set"
            );
        };

        tracing::debug!(agent = %ctx.agent, hours, url = %url, "Searching server logs");

        // OpenSearch accepts a body on GET for _search.
        let response = self
            .client
            .get(url)
            .basic_auth(user, Some(password))
            .json(&build_query(hours, self.config.result_size))
            .send()
            .await?
            .error_for_status()?;

        let body: SearchResponse = response.json().await?;
        Ok(format_hits(&body.hits.hits))
    }
}
