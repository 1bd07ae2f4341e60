//! Inbound message from a provider webhook: the canonical envelope handed to the dispatch pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WhatsApp gateway provider a device is connected through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Wablas,
    Whacenter,
    Waha,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Wablas => "wablas",
            Provider::Whacenter => "whacenter",
            Provider::Waha => "waha",
        }
    }

    /// Parse a provider tag (case-insensitive), e.g. from a route segment.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "wablas" => Some(Provider::Wablas),
            "whacenter" => Some(Provider::Whacenter),
            "waha" => Some(Provider::Waha),
            _ => None,
        }
    }

    /// Display name used when the payload carries no push name.
    pub fn placeholder_name(self) -> &'static str {
        match self {
            Provider::Wablas => "Wablas Contact",
            Provider::Whacenter => "Whacenter Contact",
            Provider::Waha => "WAHA Contact",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message type as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Document,
    Other,
}

impl MessageKind {
    /// Map a provider `type`/`messageType` string. Missing or empty means text.
    pub fn from_provider(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("text") | Some("chat") | Some("conversation") => {
                MessageKind::Text
            }
            Some("image") | Some("sticker") => MessageKind::Image,
            Some("audio") | Some("ptt") | Some("voice") => MessageKind::Audio,
            Some("video") => MessageKind::Video,
            Some("document") | Some("file") => MessageKind::Document,
            Some(_) => MessageKind::Other,
        }
    }
}

/// A normalized message from a provider webhook, ready for interception and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub device_id: String,
    pub provider: Provider,
    /// Phone-like id with gateway suffixes stripped.
    pub sender_id: String,
    /// Sender as received, suffix included.
    pub raw_sender_id: String,
    pub text: String,
    pub sender_display_name: String,
    pub is_group: bool,
    /// Sent from the device's own number (an operator typing into the gateway session).
    pub is_from_gateway: bool,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Lock key for this conversation.
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.device_id, &self.sender_id)
    }
}

/// (device, sender) pair that both lock tiers are keyed by.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    pub device_id: String,
    pub sender_id: String,
}

impl ConversationKey {
    pub fn new(device_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            sender_id: sender_id.into(),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device_id, self.sender_id)
    }
}

/// Why a payload did not become an [`InboundMessage`]. All variants are terminal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("empty message")]
    EmptyMessage,
    #[error("group message")]
    Group,
    #[error("identity resolution failed")]
    IdentityResolutionFailed,
    #[error("unknown phone format")]
    UnknownPhoneFormat,
    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),
}
