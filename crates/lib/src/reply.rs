//! Outbound reply parts produced by the flow and AI engines.

use serde::{Deserialize, Serialize};

/// Content type of one reply part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartKind {
    #[default]
    Text,
    Image,
    Audio,
    Video,
}

/// How a part is delivered: on its own, or merged with neighbouring `onemessage` text parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    #[default]
    Normal,
    #[serde(alias = "one_message", alias = "oneMessage")]
    OneMessage,
}

/// One unit of outbound content. `content` is the text body, or the media URL for media kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePart {
    #[serde(rename = "type", default)]
    pub kind: PartKind,
    pub content: String,
    #[serde(default)]
    pub combine: CombineMode,
}

impl ResponsePart {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: PartKind::Text,
            content: content.into(),
            combine: CombineMode::Normal,
        }
    }

    pub fn one_message(content: impl Into<String>) -> Self {
        Self {
            kind: PartKind::Text,
            content: content.into(),
            combine: CombineMode::OneMessage,
        }
    }

    pub fn media(kind: PartKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            content: url.into(),
            combine: CombineMode::Normal,
        }
    }

    /// True for text parts that may be merged into a single outbound message.
    pub fn is_combinable(&self) -> bool {
        self.kind == PartKind::Text && self.combine == CombineMode::OneMessage
    }
}
