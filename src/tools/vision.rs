//! `analyze_image`: asks an OpenAI-compatible vision model about an image.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::ToolContext;
use crate::config::VisionConfig;
use crate::discovery::{Registrar, ToolModule};
use crate::error::ToolError;
use crate::registry::{Arguments, ContentItem, InputSchema, ToolHandler};

/// Analysis tasks and the instruction sent for each.
const TASKS: &[(&str, &str)] = &[
    ("describe", "describe the content of this image"),
    ("objects", "identify and list the main objects in this image"),
    ("scene", "analyse the scene and setting of this image"),
    ("text", "extract all text visible in this image"),
    ("people", "describe the people in this image"),
    ("colors", "analyse the main colours of this image"),
    ("composition", "analyse the composition of this image"),
];

/// Detail levels and the phrasing prefix for each.
const DETAIL_LEVELS: &[(&str, &str)] = &[
    ("simple", "In a few simple words,"),
    ("normal", "Please"),
    ("detailed", "In thorough detail,"),
];

/// The `vision` tool module.
pub struct VisionModule;

impl ToolModule for VisionModule {
    fn name(&self) -> &'static str {
        "vision"
    }

    fn register(&self, ctx: &ToolContext, registrar: &mut Registrar<'_>) {
        registrar.register(Arc::new(AnalyzeImageTool {
            http: ctx.http.clone(),
            config: ctx.config.vision.clone(),
        }));
    }
}

/// Sends an image and an instruction to a chat-completions endpoint.
pub struct AnalyzeImageTool {
    http: reqwest::Client,
    config: VisionConfig,
}

#[async_trait]
impl ToolHandler for AnalyzeImageTool {
    fn name(&self) -> &'static str {
        "analyze_image"
    }

    fn description(&self) -> &'static str {
        "Analyse an image with a vision model: describe it, list objects, read text and more"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .required("image_url", "string", "URL (or data URL) of the image")
            .optional(
                "task",
                "string",
                "One of describe, objects, scene, text, people, colors, composition (default: describe)",
            )
            .optional(
                "detail_level",
                "string",
                "One of simple, normal, detailed (default: normal)",
            )
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let image_url = arguments.require_str("image_url")?;
        let task = arguments.optional_str("task")?.unwrap_or("describe");
        let detail = arguments.optional_str("detail_level")?.unwrap_or("normal");
        let prompt = build_prompt(task, detail)?;

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": image_url}}
                ]
            }],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        tracing::debug!(url = %url, model = %self.config.model, task, "Vision request");

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "vision model returned HTTP {} - {text}",
                status.as_u16()
            )));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| ToolError::Failed(format!("invalid vision model response: {e}")))?;
        Ok(vec![ContentItem::text(extract_answer(&json)?)])
    }
}

fn build_prompt(task: &str, detail: &str) -> Result<String, ToolError> {
    let instruction = lookup(TASKS, task).ok_or_else(|| {
        ToolError::invalid("task", format!("unsupported task '{task}'; expected one of {}", keys(TASKS)))
    })?;
    let prefix = lookup(DETAIL_LEVELS, detail).ok_or_else(|| {
        ToolError::invalid(
            "detail_level",
            format!("unsupported detail level '{detail}'; expected one of {}", keys(DETAIL_LEVELS)),
        )
    })?;
    Ok(format!("{prefix} {instruction}."))
}

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn keys(table: &[(&str, &str)]) -> String {
    table.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(", ")
}

fn extract_answer(response: &Value) -> Result<String, ToolError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::Failed("vision model returned no answer".to_string()))
}
