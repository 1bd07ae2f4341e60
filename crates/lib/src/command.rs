//! In-band operator commands.
//!
//! Operators type into the same WhatsApp session the gateway uses, so their messages arrive
//! through the webhook flagged as sent by the gateway. A leading trigger character turns such a
//! message into a control action: forward it as a canonical message, or switch human takeover
//! on or off for a conversation. This runs before any lock is taken.

use crate::channels::{InboundMessage, Provider};
use crate::services::ConversationRepository;
use anyhow::Result;
use std::sync::Arc;

/// Body a forwarded message is rewritten to.
pub const FORWARD_MARKER: &str = "[forwarded]";
/// Display name a forwarded message is attributed to.
pub const OPERATOR_NAME: &str = "Operator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Forward,
    TakeoverOn,
    TakeoverOff,
}

/// Where a takeover command finds the conversation it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TakeoverTarget {
    /// Digits following the trigger (`#60123456789`).
    Remainder,
    /// The conversation the operator typed into.
    CurrentSender,
}

struct TriggerAlphabet {
    forward: char,
    on: char,
    off: char,
    target: TakeoverTarget,
}

fn alphabet(provider: Provider) -> TriggerAlphabet {
    match provider {
        Provider::Wablas | Provider::Whacenter => TriggerAlphabet {
            forward: '%',
            on: '#',
            off: '!',
            target: TakeoverTarget::Remainder,
        },
        Provider::Waha => TriggerAlphabet {
            forward: '>',
            on: '#',
            off: '!',
            target: TakeoverTarget::CurrentSender,
        },
    }
}

/// Split a leading trigger character off `text`.
pub fn classify(provider: Provider, text: &str) -> Option<(Trigger, &str)> {
    let text = text.trim_start();
    let first = text.chars().next()?;
    let rest = &text[first.len_utf8()..];
    let a = alphabet(provider);
    let trigger = if first == a.forward {
        Trigger::Forward
    } else if first == a.on {
        Trigger::TakeoverOn
    } else if first == a.off {
        Trigger::TakeoverOff
    } else {
        return None;
    };
    Some((trigger, rest))
}

/// Outcome of interception.
#[derive(Debug)]
pub enum Intercept {
    /// Continue processing this (possibly rewritten) message.
    Forward(InboundMessage),
    /// Control traffic; nothing further to do.
    Handled,
}

pub struct CommandInterceptor {
    conversations: Arc<dyn ConversationRepository>,
}

impl CommandInterceptor {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }

    pub async fn intercept(&self, msg: InboundMessage) -> Result<Intercept> {
        let trigger = classify(msg.provider, &msg.text).map(|(t, rest)| (t, rest.to_string()));

        if !msg.is_from_gateway {
            return Ok(match trigger {
                Some((Trigger::Forward, _)) => Intercept::Forward(forward(msg)),
                _ => Intercept::Forward(msg),
            });
        }

        match trigger {
            Some((Trigger::Forward, _)) => Ok(Intercept::Forward(forward(msg))),
            Some((Trigger::TakeoverOn, rest)) => self.set_takeover(&msg, &rest, true).await,
            Some((Trigger::TakeoverOff, rest)) => self.set_takeover(&msg, &rest, false).await,
            None => {
                log::debug!(
                    "commands: ignoring operator message on {} for {}",
                    msg.device_id,
                    msg.sender_id
                );
                Ok(Intercept::Handled)
            }
        }
    }

    async fn set_takeover(&self, msg: &InboundMessage, rest: &str, on: bool) -> Result<Intercept> {
        let target = match alphabet(msg.provider).target {
            TakeoverTarget::CurrentSender => msg.sender_id.clone(),
            TakeoverTarget::Remainder => rest.chars().filter(char::is_ascii_digit).collect(),
        };
        if target.is_empty() {
            log::warn!(
                "commands: takeover command on {} has no target number",
                msg.device_id
            );
            return Ok(Intercept::Handled);
        }
        self.conversations
            .set_human_takeover(&target, &msg.device_id, on)
            .await?;
        log::info!(
            "commands: human takeover {} for {} on {}",
            if on { "enabled" } else { "disabled" },
            target,
            msg.device_id
        );
        Ok(Intercept::Handled)
    }
}

fn forward(mut msg: InboundMessage) -> InboundMessage {
    msg.text = FORWARD_MARKER.to_string();
    msg.sender_display_name = OPERATOR_NAME.to_string();
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MessageKind;
    use crate::services::InMemoryConversationRepository;

    fn message(provider: Provider, text: &str, from_gateway: bool) -> InboundMessage {
        InboundMessage {
            device_id: "dev".into(),
            provider,
            sender_id: "60123456789".into(),
            raw_sender_id: "60123456789@c.us".into(),
            text: text.into(),
            sender_display_name: "Aina".into(),
            is_group: false,
            is_from_gateway: from_gateway,
            kind: MessageKind::Text,
            media_url: None,
            received_at: chrono::Utc::now(),
        }
    }

    fn interceptor() -> (CommandInterceptor, Arc<InMemoryConversationRepository>) {
        let repo = Arc::new(InMemoryConversationRepository::new());
        (CommandInterceptor::new(repo.clone()), repo)
    }

    #[test]
    fn alphabets_differ_per_provider() {
        assert_eq!(classify(Provider::Wablas, "%hi").map(|t| t.0), Some(Trigger::Forward));
        assert_eq!(classify(Provider::Waha, "%hi"), None);
        assert_eq!(classify(Provider::Waha, ">hi").map(|t| t.0), Some(Trigger::Forward));
        assert_eq!(
            classify(Provider::Whacenter, " #601").map(|t| t.1),
            Some("601")
        );
    }

    #[tokio::test]
    async fn forward_trigger_rewrites_inbound_text() {
        let (ic, _) = interceptor();
        let got = ic.intercept(message(Provider::Wablas, "%promo today", false)).await.unwrap();
        let Intercept::Forward(msg) = got else { panic!("expected forward") };
        assert_eq!(msg.text, FORWARD_MARKER);
        assert_eq!(msg.sender_display_name, OPERATOR_NAME);
    }

    #[tokio::test]
    async fn plain_inbound_passes_through() {
        let (ic, _) = interceptor();
        let got = ic.intercept(message(Provider::Wablas, "#hello", false)).await.unwrap();
        let Intercept::Forward(msg) = got else { panic!("expected forward") };
        assert_eq!(msg.text, "#hello");
    }

    #[tokio::test]
    async fn takeover_on_uses_remainder_number() {
        let (ic, repo) = interceptor();
        let got = ic
            .intercept(message(Provider::Wablas, "#60199990000", true))
            .await
            .unwrap();
        assert!(matches!(got, Intercept::Handled));
        let conv = repo.get_by_prospect("60199990000").await.unwrap().unwrap();
        assert!(conv.human_takeover);
    }

    #[tokio::test]
    async fn waha_takeover_targets_current_conversation() {
        let (ic, repo) = interceptor();
        ic.intercept(message(Provider::Waha, "#", true)).await.unwrap();
        assert!(repo.get_by_prospect("60123456789").await.unwrap().unwrap().human_takeover);
        ic.intercept(message(Provider::Waha, "!", true)).await.unwrap();
        assert!(!repo.get_by_prospect("60123456789").await.unwrap().unwrap().human_takeover);
    }

    #[tokio::test]
    async fn toggling_twice_ends_off() {
        let (ic, repo) = interceptor();
        for _ in 0..2 {
            ic.intercept(message(Provider::Whacenter, "#60123456789", true)).await.unwrap();
            ic.intercept(message(Provider::Whacenter, "!60123456789", true)).await.unwrap();
        }
        assert!(!repo.get_by_prospect("60123456789").await.unwrap().unwrap().human_takeover);
    }

    #[tokio::test]
    async fn other_operator_text_is_ignored() {
        let (ic, repo) = interceptor();
        let got = ic.intercept(message(Provider::Wablas, "thanks, on my way", true)).await.unwrap();
        assert!(matches!(got, Intercept::Handled));
        assert!(repo.get_by_prospect("60123456789").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn takeover_without_target_is_ignored() {
        let (ic, repo) = interceptor();
        let got = ic.intercept(message(Provider::Wablas, "# ", true)).await.unwrap();
        assert!(matches!(got, Intercept::Handled));
        assert!(repo.get_by_prospect("60123456789").await.unwrap().is_none());
    }
}
