//! Markdown report export to a standalone HTML page.

use std::path::PathBuf;

use async_trait::async_trait;
use pulldown_cmark::{html, Event, Options, Parser};
use serde_json::{json, Value};

use super::{Tool, ToolContext};

const DEFAULT_OUTPUT_DIR: &str = "./reports";

const STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, sans-serif;
            max-width: 900px;
            margin: 0 auto;
            padding: 20px;
            background: #1a1a1a;
            color: #e0e0e0;
        }
        h1, h2, h3 { color: #ff6b35; }
        code { background: #2d2d2d; padding: 2px 6px; border-radius: 3px; }
        pre { background: #2d2d2d; padding: 15px; border-radius: 5px; overflow-x: auto; }
        table { border-collapse: collapse; width: 100%; margin: 15px 0; }
        th, td { border: 1px solid #444; padding: 10px; text-align: left; }
        th { background: #2d2d2d; }
        .timestamp { color: #888; font-size: 0.9em; }
"#;

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
}

impl ReportConfig {
    pub fn from_env() -> Self {
        let dir = std::env::var("REPORT_OUTPUT_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());
        Self {
            output_dir: PathBuf::from(dir),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

/// `save_report_html`: render a markdown report and write it to disk.
pub struct SaveReportHtml {
    config: ReportConfig,
}

impl SaveReportHtml {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }
}

/// Markdown to HTML with tables, strikethrough and every newline kept as a
/// line break.
fn render_markdown(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn render_page(body: &str, title: &str, generated: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{STYLE}    </style>
</head>
<body>
    <div class="timestamp">Generated: {generated}</div>
{body}</body>
</html>
"#
    )
}

/// Keep `[A-Za-z0-9._-]`, drop a trailing `.html`, refuse names that are
/// empty or only dots.
fn sanitize_filename(name: &str) -> Option<String> {
    let name = name.trim();
    let name = name.strip_suffix(".html").unwrap_or(name);
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.' || c == '_') {
        None
    } else {
        Some(cleaned)
    }
}

#[async_trait]
impl Tool for SaveReportHtml {
    fn name(&self) -> &str {
        "save_report_html"
    }

    fn description(&self) -> &str {
        "Save an analysis report, written in markdown, as a rendered HTML file. Returns the path of the saved file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_markdown": {
                    "type": "string",
                    "description": "The report content in markdown format"
                },
                "filename": {
                    "type": "string",
                    "description": "Optional filename without extension; defaults to a timestamped name"
                }
            },
            "required": ["report_markdown"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let markdown = args
            .get("report_markdown")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing required argument: report_markdown"))?;

        let now = chrono::Local::now();
        let filename = args
            .get("filename")
            .and_then(Value::as_str)
            .and_then(sanitize_filename)
            .unwrap_or_else(|| format!("{}-report-{}", ctx.agent, now.format("%Y%m%d-%H%M%S")));

        let page = render_page(
            &render_markdown(markdown),
            &format!("{} report - {}", ctx.agent, now.format("%Y-%m-%d %H:%M")),
            &now.format("%Y-%m-%d %H:%M:%S").to_string(),
        );

        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let path = self.config.output_dir.join(format!("{}.html", filename));
        tokio::fs::write(&path, page).await?;

        tracing::info!(agent = %ctx.agent, path = %path.display(), "Saved HTML report");
        Ok(format!("Report saved to: {}", path.display()))
    }
}
