//! Ollama API client (http://127.0.0.1:11434 by default) and the conversation engine built on it.

use crate::reply::ResponsePart;
use crate::services::{AiConversationService, AiReply, AiRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a friendly WhatsApp sales assistant. Keep replies short and conversational.";

const REPLY_FORMAT: &str = "Answer with a JSON object only: \
{\"stage\": \"<conversation stage after your reply>\", \
\"response\": [{\"type\": \"text\", \"content\": \"...\", \"combine\": \"onemessage\"}]}. \
Use \"combine\": \"onemessage\" for text parts that belong in one chat bubble, \
and \"type\": \"image\" with a URL as content to send a picture.";

/// Client for Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ollama api error: {0}")]
    Api(String),
}

impl OllamaClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// GET /api/tags: list available models.
    pub async fn list_models(&self) -> Result<Vec<OllamaModel>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let data: TagsResponse = res.json().await?;
        Ok(data.models.unwrap_or_default())
    }

    /// POST /api/chat: non-streaming chat completion. `format: Some("json")` asks the model for
    /// a JSON object.
    pub async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        format: Option<&str>,
    ) -> Result<ChatResponse, OllamaError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            format: format.map(str::to_string),
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let data: ChatResponse = res.json().await?;
        Ok(data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<OllamaModel>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: Option<ChatMessage>,
}

impl ChatResponse {
    /// Text content of the assistant message, if any.
    pub fn content(&self) -> &str {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// AI conversation engine backed by a local Ollama model.
///
/// The current stage goes into the system prompt; the model answers with the stage it moved to
/// and the reply parts. Free-text answers are sent as a single text part.
pub struct OllamaConversationEngine {
    client: OllamaClient,
    model: Option<String>,
    resolved_model: OnceCell<String>,
    system_prompt: String,
}

impl OllamaConversationEngine {
    pub fn new(client: OllamaClient, model: Option<String>, system_prompt: Option<String>) -> Self {
        Self {
            client,
            model: model.filter(|m| !m.trim().is_empty()),
            resolved_model: OnceCell::new(),
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    /// Configured model, or the first model Ollama reports.
    async fn model(&self) -> Result<&str> {
        if let Some(m) = self.model.as_deref() {
            return Ok(m);
        }
        let m = self
            .resolved_model
            .get_or_try_init(|| async {
                let models = self.client.list_models().await?;
                let first = models
                    .into_iter()
                    .next()
                    .map(|m| m.name)
                    .context("no ollama models installed and agents.defaultModel is not set")?;
                log::info!("ai: using ollama model {}", first);
                Ok::<_, anyhow::Error>(first)
            })
            .await?;
        Ok(m.as_str())
    }

    fn system_message(&self, req: &AiRequest) -> String {
        format!(
            "{}\n\nCustomer name: {}\nCurrent stage: {}\n\n{}",
            self.system_prompt,
            req.sender_name,
            req.stage.as_deref().unwrap_or("none (new conversation)"),
            REPLY_FORMAT
        )
    }
}

#[async_trait]
impl AiConversationService for OllamaConversationEngine {
    async fn process(&self, req: AiRequest) -> Result<AiReply> {
        let model = self.model().await?;
        let messages = vec![
            ChatMessage::system(self.system_message(&req)),
            ChatMessage::user(req.text.clone()),
        ];
        let res = self
            .client
            .chat(model, messages, Some("json"))
            .await
            .with_context(|| format!("ollama chat for {} on {}", req.sender_id, req.device_id))?;
        Ok(parse_reply(res.content(), req.stage))
    }
}

/// Decode the model's answer. Anything that is not a reply object (no `response` and no
/// `stage`) is sent as plain text and keeps the previous stage.
pub fn parse_reply(content: &str, previous_stage: Option<String>) -> AiReply {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    match serde_json::from_str::<AiReply>(body) {
        Ok(reply) if !reply.parts.is_empty() || reply.stage.is_some() => AiReply {
            stage: reply.stage.filter(|s| !s.trim().is_empty()).or(previous_stage),
            parts: reply.parts,
        },
        _ if trimmed.is_empty() => AiReply {
            parts: Vec::new(),
            stage: previous_stage,
        },
        _ => AiReply {
            parts: vec![ResponsePart::text(trimmed)],
            stage: previous_stage,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::PartKind;

    #[test]
    fn structured_reply_is_decoded() {
        let reply = parse_reply(
            r#"{"stage":"offer","response":[
                {"type":"text","content":"Hi!","combine":"onemessage"},
                {"type":"image","content":"https://x/catalog.png"}]}"#,
            Some("greeting".into()),
        );
        assert_eq!(reply.stage.as_deref(), Some("offer"));
        assert_eq!(reply.parts.len(), 2);
        assert!(reply.parts[0].is_combinable());
        assert_eq!(reply.parts[1].kind, PartKind::Image);
    }

    #[test]
    fn fenced_json_is_accepted() {
        let reply = parse_reply(
            "```json\n{\"response\":[{\"type\":\"text\",\"content\":\"ok\"}]}\n```",
            Some("greeting".into()),
        );
        assert_eq!(reply.parts, vec![ResponsePart::text("ok")]);
        assert_eq!(reply.stage.as_deref(), Some("greeting"));
    }

    #[test]
    fn free_text_becomes_one_part() {
        let reply = parse_reply("Sure, we open at 9am.", None);
        assert_eq!(reply.parts, vec![ResponsePart::text("Sure, we open at 9am.")]);
        assert_eq!(reply.stage, None);
    }

    #[test]
    fn system_message_carries_stage() {
        let engine = OllamaConversationEngine::new(OllamaClient::new(None), None, None);
        let msg = engine.system_message(&AiRequest {
            sender_id: "601".into(),
            device_id: "dev".into(),
            text: "hi".into(),
            stage: Some("offer".into()),
            sender_name: "Aina".into(),
        });
        assert!(msg.contains("Current stage: offer"));
        assert!(msg.contains("Customer name: Aina"));
    }
}
