//! Wablas: flat webhook JSON in, `/api/send-*` endpoints out.

use crate::channels::inbound::{InboundMessage, MessageKind, Provider, RejectReason};
use crate::channels::phone;
use crate::channels::registry::{ensure_success, DeviceCredentials, SendAdapter, SendError};
use crate::channels::wire::{first_present, opt_bool, opt_string};
use crate::reply::PartKind;
use async_trait::async_trait;
use serde::Deserialize;

const WABLAS_API_BASE: &str = "https://console.wablas.com";

/// Wablas webhook body. Older and newer console versions name the same fields differently.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WablasPayload {
    #[serde(default, deserialize_with = "opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub sender: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub from: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub is_group: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub is_from_me: Option<bool>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

/// Normalize a Wablas webhook into the canonical envelope.
pub fn normalize(device_id: &str, p: &WablasPayload) -> Result<InboundMessage, RejectReason> {
    let (path, raw_sender) = first_present(&[
        ("phone", p.phone.as_deref()),
        ("sender", p.sender.as_deref()),
        ("from", p.from.as_deref()),
    ])
    .ok_or(RejectReason::MissingField("sender"))?;
    log::debug!(
        "wablas: message {} sender taken from `{}`",
        p.id.as_deref().unwrap_or("-"),
        path
    );

    if p.is_group == Some(true) {
        return Err(RejectReason::Group);
    }
    let sender_id = phone::resolve_sender(raw_sender, &[])?;

    let text = match first_present(&[
        ("message", p.message.as_deref()),
        ("text", p.text.as_deref()),
        ("caption", p.caption.as_deref()),
    ]) {
        Some((path, text)) => {
            log::debug!("wablas: text taken from `{}`", path);
            text.to_string()
        }
        None => return Err(RejectReason::EmptyMessage),
    };

    let sender_display_name = first_present(&[
        ("pushName", p.push_name.as_deref()),
        ("name", p.name.as_deref()),
    ])
    .map(|(_, n)| n.to_string())
    .unwrap_or_else(|| Provider::Wablas.placeholder_name().to_string());

    Ok(InboundMessage {
        device_id: device_id.to_string(),
        provider: Provider::Wablas,
        sender_id,
        raw_sender_id: raw_sender.to_string(),
        text,
        sender_display_name,
        is_group: false,
        is_from_gateway: p.is_from_me.unwrap_or(false),
        kind: MessageKind::from_provider(p.message_type.as_deref()),
        media_url: first_present(&[("url", p.url.as_deref()), ("file", p.file.as_deref())])
            .map(|(_, u)| u.to_string()),
        received_at: chrono::Utc::now(),
    })
}

/// Wablas send adapter. The device token goes in the `Authorization` header as-is.
pub struct WablasSender {
    client: reqwest::Client,
}

impl Default for WablasSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WablasSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn post(
        &self,
        device: &DeviceCredentials,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<(), SendError> {
        let token = device
            .api_key
            .as_deref()
            .ok_or(SendError::MissingCredential("apiKey"))?;
        let url = format!("{}/api/{}", device.base_url_or(WABLAS_API_BASE), endpoint);
        let res = self
            .client
            .post(&url)
            .header("Authorization", token)
            .json(&body)
            .send()
            .await?;
        ensure_success(res).await
    }
}

#[async_trait]
impl SendAdapter for WablasSender {
    fn provider(&self) -> Provider {
        Provider::Wablas
    }

    async fn send_text(
        &self,
        device: &DeviceCredentials,
        to: &str,
        text: &str,
    ) -> Result<(), SendError> {
        let body = serde_json::json!({ "phone": to, "message": text });
        self.post(device, "send-message", body).await
    }

    async fn send_image(
        &self,
        device: &DeviceCredentials,
        to: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<(), SendError> {
        let body = serde_json::json!({
            "phone": to,
            "image": url,
            "caption": caption.unwrap_or(""),
        });
        self.post(device, "send-image", body).await
    }

    async fn send_media(
        &self,
        device: &DeviceCredentials,
        to: &str,
        kind: PartKind,
        url: &str,
    ) -> Result<(), SendError> {
        let (endpoint, field) = match kind {
            PartKind::Audio => ("send-audio", "audio"),
            PartKind::Video => ("send-video", "video"),
            PartKind::Image => return self.send_image(device, to, url, None).await,
            PartKind::Text => return Err(SendError::UnsupportedKind("text")),
        };
        let mut body = serde_json::json!({ "phone": to });
        body[field] = serde_json::Value::String(url.to_string());
        self.post(device, endpoint, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> WablasPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn normalizes_standard_payload() {
        let p = parse(
            r#"{"id":"ABC","phone":"60123456789","message":"hello","pushName":"Aina",
                "isGroup":false,"isFromMe":false,"messageType":"text"}"#,
        );
        let msg = normalize("dev-1", &p).unwrap();
        assert_eq!(msg.sender_id, "60123456789");
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.sender_display_name, "Aina");
        assert_eq!(msg.provider, Provider::Wablas);
        assert!(!msg.is_from_gateway);
    }

    #[test]
    fn falls_back_to_looser_fields() {
        let p = parse(r#"{"sender":60198887777,"text":"hi there","isFromMe":"true"}"#);
        let msg = normalize("dev-1", &p).unwrap();
        assert_eq!(msg.sender_id, "60198887777");
        assert_eq!(msg.text, "hi there");
        assert_eq!(msg.sender_display_name, "Wablas Contact");
        assert!(msg.is_from_gateway);
    }

    #[test]
    fn group_flag_rejects() {
        let p = parse(r#"{"phone":"60123456789","message":"hi","isGroup":true}"#);
        assert_eq!(normalize("d", &p).unwrap_err(), RejectReason::Group);
    }

    #[test]
    fn missing_sender_or_text_rejects() {
        let p = parse(r#"{"message":"hi"}"#);
        assert_eq!(
            normalize("d", &p).unwrap_err(),
            RejectReason::MissingField("sender")
        );
        let p = parse(r#"{"phone":"60123456789","message":"   ","messageType":"image","url":"https://x/a.jpg"}"#);
        assert_eq!(normalize("d", &p).unwrap_err(), RejectReason::EmptyMessage);
    }

    #[test]
    fn caption_keeps_media_url() {
        let p = parse(
            r#"{"phone":"60123456789","caption":"see this","messageType":"image","file":"https://x/a.jpg"}"#,
        );
        let msg = normalize("d", &p).unwrap();
        assert_eq!(msg.kind, MessageKind::Image);
        assert_eq!(msg.media_url.as_deref(), Some("https://x/a.jpg"));
    }
}
