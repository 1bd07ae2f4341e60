//! Whacenter: flat webhook JSON in, a single `/api/send` endpoint out.

use crate::channels::inbound::{InboundMessage, MessageKind, Provider, RejectReason};
use crate::channels::phone;
use crate::channels::registry::{ensure_success, DeviceCredentials, SendAdapter, SendError};
use crate::channels::wire::{first_present, opt_bool, opt_string};
use crate::reply::PartKind;
use async_trait::async_trait;
use serde::Deserialize;

const WHACENTER_API_BASE: &str = "https://app.whacenter.com";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhacenterPayload {
    #[serde(default, deserialize_with = "opt_string")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub sender: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub is_group: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub from_me: Option<bool>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Normalize a Whacenter webhook into the canonical envelope.
pub fn normalize(device_id: &str, p: &WhacenterPayload) -> Result<InboundMessage, RejectReason> {
    let (path, raw_sender) = first_present(&[
        ("from", p.from.as_deref()),
        ("number", p.number.as_deref()),
        ("sender", p.sender.as_deref()),
    ])
    .ok_or(RejectReason::MissingField("sender"))?;
    log::debug!("whacenter: sender taken from `{}`", path);

    if p.is_group == Some(true) {
        return Err(RejectReason::Group);
    }
    let sender_id = phone::resolve_sender(raw_sender, &[])?;

    let (path, text) = first_present(&[
        ("message", p.message.as_deref()),
        ("text", p.text.as_deref()),
        ("body", p.body.as_deref()),
    ])
    .ok_or(RejectReason::EmptyMessage)?;
    log::debug!("whacenter: text taken from `{}`", path);

    let sender_display_name = first_present(&[
        ("pushName", p.push_name.as_deref()),
        ("name", p.name.as_deref()),
    ])
    .map(|(_, n)| n.to_string())
    .unwrap_or_else(|| Provider::Whacenter.placeholder_name().to_string());

    Ok(InboundMessage {
        device_id: device_id.to_string(),
        provider: Provider::Whacenter,
        sender_id,
        raw_sender_id: raw_sender.to_string(),
        text: text.to_string(),
        sender_display_name,
        is_group: false,
        is_from_gateway: p.from_me.unwrap_or(false),
        kind: MessageKind::from_provider(p.message_type.as_deref()),
        media_url: p
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string),
        received_at: chrono::Utc::now(),
    })
}

/// Whacenter send adapter. Whacenter identifies the sending device by its own device key,
/// which is configured as the device's `apiKey`.
pub struct WhacenterSender {
    client: reqwest::Client,
}

impl Default for WhacenterSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WhacenterSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn send(
        &self,
        device: &DeviceCredentials,
        to: &str,
        message: &str,
        file: Option<&str>,
    ) -> Result<(), SendError> {
        let device_key = device
            .api_key
            .as_deref()
            .ok_or(SendError::MissingCredential("apiKey"))?;
        let url = format!("{}/api/send", device.base_url_or(WHACENTER_API_BASE));
        let mut body = serde_json::json!({
            "device_id": device_key,
            "number": to,
            "message": message,
        });
        if let Some(f) = file {
            body["file"] = serde_json::Value::String(f.to_string());
        }
        let res = self.client.post(&url).json(&body).send().await?;
        ensure_success(res).await
    }
}

#[async_trait]
impl SendAdapter for WhacenterSender {
    fn provider(&self) -> Provider {
        Provider::Whacenter
    }

    async fn send_text(
        &self,
        device: &DeviceCredentials,
        to: &str,
        text: &str,
    ) -> Result<(), SendError> {
        self.send(device, to, text, None).await
    }

    async fn send_image(
        &self,
        device: &DeviceCredentials,
        to: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<(), SendError> {
        self.send(device, to, caption.unwrap_or(""), Some(url)).await
    }

    async fn send_media(
        &self,
        device: &DeviceCredentials,
        to: &str,
        kind: PartKind,
        url: &str,
    ) -> Result<(), SendError> {
        if kind == PartKind::Text {
            return Err(SendError::UnsupportedKind("text"));
        }
        self.send(device, to, "", Some(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> WhacenterPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn normalizes_standard_payload() {
        let p = parse(r#"{"from":"6281234567890","message":"halo","pushName":"Budi"}"#);
        let msg = normalize("wc-1", &p).unwrap();
        assert_eq!(msg.sender_id, "6281234567890");
        assert_eq!(msg.text, "halo");
        assert_eq!(msg.sender_display_name, "Budi");
    }

    #[test]
    fn falls_back_to_number_and_body() {
        let p = parse(r#"{"number":"6281234567890@s.whatsapp.net","body":"ping","fromMe":1}"#);
        let msg = normalize("wc-1", &p).unwrap();
        assert_eq!(msg.sender_id, "6281234567890");
        assert_eq!(msg.raw_sender_id, "6281234567890@s.whatsapp.net");
        assert_eq!(msg.text, "ping");
        assert_eq!(msg.sender_display_name, "Whacenter Contact");
        assert!(msg.is_from_gateway);
    }

    #[test]
    fn group_sender_rejects() {
        let p = parse(r#"{"from":"120363025246125888@g.us","message":"hi"}"#);
        assert_eq!(normalize("d", &p).unwrap_err(), RejectReason::Group);
    }

    #[test]
    fn empty_text_rejects() {
        let p = parse(r#"{"from":"6281234567890","message":""}"#);
        assert_eq!(normalize("d", &p).unwrap_err(), RejectReason::EmptyMessage);
    }
}
