//! Dispatcher: decides between the flow engine and the AI engine for one message.

use crate::channels::{InboundMessage, MessageKind};
use crate::guard::SessionLock;
use crate::reply::ResponsePart;
use crate::services::{
    AiConversationService, AiRequest, ConversationRepository, DeviceCommandHandler, FlowRequest,
    FlowService,
};
use std::sync::Arc;
use thiserror::Error;

/// Canonical device-command prefixes, checked after normalization.
pub const DEVICE_COMMAND_PREFIXES: &[&str] = &["/new", "/reset", "/stage"];

const MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".mp3", ".ogg", ".opus", ".m4a", ".wav", ".mp4",
    ".mov", ".3gp", ".pdf",
];

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("ai engine failed: {0:#}")]
    Ai(anyhow::Error),
    #[error("conversation repository failed: {0:#}")]
    Repository(anyhow::Error),
    #[error("device command failed: {0:#}")]
    Command(anyhow::Error),
    #[error("session lock store failed: {0:#}")]
    Lock(anyhow::Error),
}

pub struct Dispatcher {
    flows: Arc<dyn FlowService>,
    ai: Arc<dyn AiConversationService>,
    conversations: Arc<dyn ConversationRepository>,
    commands: Arc<dyn DeviceCommandHandler>,
    sessions: SessionLock,
}

impl Dispatcher {
    pub fn new(
        flows: Arc<dyn FlowService>,
        ai: Arc<dyn AiConversationService>,
        conversations: Arc<dyn ConversationRepository>,
        commands: Arc<dyn DeviceCommandHandler>,
        sessions: SessionLock,
    ) -> Self {
        Self {
            flows,
            ai,
            conversations,
            commands,
            sessions,
        }
    }

    /// Produce the reply parts for `msg`. An empty list means nothing is sent.
    pub async fn dispatch(&self, msg: &InboundMessage) -> Result<Vec<ResponsePart>, DispatchError> {
        let key = msg.key();
        if msg.kind != MessageKind::Text {
            log::debug!("dispatch: dropping {:?} message from {}", msg.kind, key);
            return Ok(Vec::new());
        }
        let text = strip_media_urls(&msg.text);
        if text.is_empty() {
            log::debug!("dispatch: message from {} held only media links", key);
            return Ok(Vec::new());
        }
        let mut msg = msg.clone();
        msg.text = text;

        if is_device_command(&msg.text) {
            log::info!("dispatch: device command from {}", key);
            return self
                .commands
                .handle(&msg)
                .await
                .map_err(DispatchError::Command);
        }

        let conversation = self
            .conversations
            .get_by_prospect(&msg.sender_id)
            .await
            .map_err(DispatchError::Repository)?;
        if conversation.as_ref().map_or(false, |c| c.human_takeover) {
            log::info!("dispatch: {} is under human takeover", key);
            return Ok(Vec::new());
        }
        let stage = conversation.and_then(|c| c.stage);

        let flows = match self.flows.flows_by_device(&msg.device_id).await {
            Ok(flows) => flows,
            Err(e) => {
                log::warn!("dispatch: listing flows for {} failed: {:#}", msg.device_id, e);
                Vec::new()
            }
        };
        if !flows.is_empty() {
            let req = FlowRequest {
                device_id: msg.device_id.clone(),
                sender_id: msg.sender_id.clone(),
                sender_name: msg.sender_display_name.clone(),
                text: msg.text.clone(),
                flows,
            };
            match self.flows.process_incoming(req).await {
                Ok(parts) => return Ok(parts),
                Err(e) => log::warn!("dispatch: flow engine failed for {}, using ai: {:#}", key, e),
            }
        }

        self.run_ai(&msg, stage).await
    }

    async fn run_ai(
        &self,
        msg: &InboundMessage,
        stage: Option<String>,
    ) -> Result<Vec<ResponsePart>, DispatchError> {
        let key = msg.key();
        let Some(guard) = self
            .sessions
            .try_acquire(&key)
            .await
            .map_err(DispatchError::Lock)?
        else {
            log::debug!("dispatch: reply already in progress for {}, dropping message", key);
            return Ok(Vec::new());
        };

        let req = AiRequest {
            sender_id: msg.sender_id.clone(),
            device_id: msg.device_id.clone(),
            text: msg.text.clone(),
            stage: stage.clone(),
            sender_name: msg.sender_display_name.clone(),
        };
        guard
            .scope(async {
                let reply = self.ai.process(req).await.map_err(DispatchError::Ai)?;
                if let Some(next) = reply.stage.filter(|s| Some(s) != stage.as_ref()) {
                    log::debug!("dispatch: {} moves to stage {}", key, next);
                    self.conversations
                        .update_stage(&msg.sender_id, &msg.device_id, Some(next))
                        .await
                        .map_err(DispatchError::Repository)?;
                }
                Ok::<_, DispatchError>(reply.parts)
            })
            .await
    }
}

fn is_device_command(text: &str) -> bool {
    let first = text.split_whitespace().next().unwrap_or("").to_lowercase();
    DEVICE_COMMAND_PREFIXES.contains(&first.as_str())
}

fn is_media_url(token: &str) -> bool {
    let lower = token.to_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }
    let path = lower.split(['?', '#']).next().unwrap_or("");
    MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Remove embedded media links from `text`. Text without any is returned trimmed but otherwise
/// untouched.
pub fn strip_media_urls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(|c: char| !c.is_whitespace()) {
        let end = rest[start..]
            .find(char::is_whitespace)
            .map_or(rest.len(), |n| start + n);
        let token = &rest[start..end];
        if is_media_url(token) {
            // The link goes with its surrounding blanks; line breaks stay.
            let kept = out.trim_end_matches(|c: char| c.is_whitespace() && c != '\n').len();
            out.truncate(kept);
            out.extend(rest[..start].chars().filter(|&c| c == '\n'));
        } else {
            out.push_str(&rest[..end]);
        }
        rest = &rest[end..];
    }
    out.trim().to_string()
}
