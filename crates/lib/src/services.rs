//! Collaborators the dispatch pipeline talks to: flow engine, AI engine, conversation records,
//! device commands. The pipeline only sees these traits; the in-memory and no-op
//! implementations here back the gateway binary and the tests.

use crate::channels::InboundMessage;
use crate::reply::ResponsePart;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A scripted flow configured for a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub device_id: String,
}

/// Input to one flow-engine step.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub device_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub flows: Vec<Flow>,
}

#[async_trait]
pub trait FlowService: Send + Sync {
    async fn flows_by_device(&self, device_id: &str) -> Result<Vec<Flow>>;
    async fn process_incoming(&self, req: FlowRequest) -> Result<Vec<ResponsePart>>;
}

/// Input to one AI conversation turn.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub sender_id: String,
    pub device_id: String,
    pub text: String,
    pub stage: Option<String>,
    pub sender_name: String,
}

/// AI engine output: reply parts plus the stage the conversation moved to, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiReply {
    #[serde(default, rename = "response")]
    pub parts: Vec<ResponsePart>,
    #[serde(default)]
    pub stage: Option<String>,
}

#[async_trait]
pub trait AiConversationService: Send + Sync {
    async fn process(&self, req: AiRequest) -> Result<AiReply>;
}

/// Per-prospect conversation record, as far as dispatch cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    pub device_id: String,
    pub stage: Option<String>,
    pub human_takeover: bool,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get_by_prospect(&self, sender_id: &str) -> Result<Option<Conversation>>;
    async fn set_human_takeover(&self, sender_id: &str, device_id: &str, on: bool) -> Result<()>;
    async fn update_stage(
        &self,
        sender_id: &str,
        device_id: &str,
        stage: Option<String>,
    ) -> Result<()>;
}

/// Handles the canonical device-command prefixes (`/new`, `/reset`, `/stage`).
#[async_trait]
pub trait DeviceCommandHandler: Send + Sync {
    async fn handle(&self, msg: &InboundMessage) -> Result<Vec<ResponsePart>>;
}

/// Conversation records kept in process memory, keyed by prospect (sender) id.
pub struct InMemoryConversationRepository {
    inner: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl Default for InMemoryConversationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn get_by_prospect(&self, sender_id: &str) -> Result<Option<Conversation>> {
        Ok(self.inner.read().await.get(sender_id).cloned())
    }

    async fn set_human_takeover(&self, sender_id: &str, device_id: &str, on: bool) -> Result<()> {
        let mut g = self.inner.write().await;
        let conv = g.entry(sender_id.to_string()).or_insert_with(|| Conversation {
            device_id: device_id.to_string(),
            ..Conversation::default()
        });
        conv.human_takeover = on;
        Ok(())
    }

    async fn update_stage(
        &self,
        sender_id: &str,
        device_id: &str,
        stage: Option<String>,
    ) -> Result<()> {
        let mut g = self.inner.write().await;
        let conv = g.entry(sender_id.to_string()).or_insert_with(|| Conversation {
            device_id: device_id.to_string(),
            ..Conversation::default()
        });
        conv.stage = stage;
        Ok(())
    }
}

/// Flow service for deployments without a flow engine: no device has flows.
pub struct NoFlows;

#[async_trait]
impl FlowService for NoFlows {
    async fn flows_by_device(&self, _device_id: &str) -> Result<Vec<Flow>> {
        Ok(Vec::new())
    }

    async fn process_incoming(&self, _req: FlowRequest) -> Result<Vec<ResponsePart>> {
        Ok(Vec::new())
    }
}

/// Built-in device commands backed by the conversation repository.
pub struct BuiltinDeviceCommands {
    conversations: Arc<dyn ConversationRepository>,
}

impl BuiltinDeviceCommands {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }
}

#[async_trait]
impl DeviceCommandHandler for BuiltinDeviceCommands {
    async fn handle(&self, msg: &InboundMessage) -> Result<Vec<ResponsePart>> {
        let command = msg
            .text
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_lowercase();
        match command.as_str() {
            "/new" | "/reset" => {
                self.conversations
                    .update_stage(&msg.sender_id, &msg.device_id, None)
                    .await?;
                Ok(vec![ResponsePart::text(
                    "conversation restarted. next message starts from the beginning.",
                )])
            }
            "/stage" => {
                let stage = self
                    .conversations
                    .get_by_prospect(&msg.sender_id)
                    .await?
                    .and_then(|c| c.stage);
                Ok(vec![ResponsePart::text(format!(
                    "current stage: {}",
                    stage.as_deref().unwrap_or("(none)")
                ))])
            }
            other => {
                log::debug!("commands: unknown device command {:?}", other);
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn takeover_toggle_is_idempotent() {
        let repo = InMemoryConversationRepository::new();
        for _ in 0..2 {
            repo.set_human_takeover("601", "d", true).await.unwrap();
            repo.set_human_takeover("601", "d", false).await.unwrap();
        }
        let conv = repo.get_by_prospect("601").await.unwrap().unwrap();
        assert!(!conv.human_takeover);
        assert_eq!(conv.device_id, "d");
    }

    #[tokio::test]
    async fn stage_survives_takeover_flip() {
        let repo = InMemoryConversationRepository::new();
        repo.update_stage("601", "d", Some("greeting".into())).await.unwrap();
        repo.set_human_takeover("601", "d", true).await.unwrap();
        let conv = repo.get_by_prospect("601").await.unwrap().unwrap();
        assert_eq!(conv.stage.as_deref(), Some("greeting"));
        assert!(conv.human_takeover);
    }

    #[test]
    fn ai_reply_decodes_response_array() {
        let reply: AiReply = serde_json::from_str(
            r#"{"stage":"offer","response":[{"type":"text","content":"hi","combine":"onemessage"}]}"#,
        )
        .unwrap();
        assert_eq!(reply.stage.as_deref(), Some("offer"));
        assert_eq!(reply.parts.len(), 1);
    }
}
