//! Webhook acknowledgment bodies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Received,
    /// WAHA expects `success`.
    Success,
    Ignored,
    Busy,
}

/// `{ "status": ..., "reason"?: ... }` returned synchronously to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Ack {
    pub fn new(status: AckStatus) -> Self {
        Self {
            status,
            reason: None,
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Ignored,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        assert_eq!(
            serde_json::to_string(&Ack::new(AckStatus::Success)).unwrap(),
            r#"{"status":"success"}"#
        );
        assert_eq!(
            serde_json::to_string(&Ack::ignored("group message")).unwrap(),
            r#"{"status":"ignored","reason":"group message"}"#
        );
    }
}
