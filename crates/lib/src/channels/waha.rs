//! WAHA (WhatsApp HTTP API): event envelopes in, `/api/send*` endpoints out.
//!
//! WAHA engines disagree on where message fields live. WEBJS puts `body`/`from`/`notifyName`
//! under `payload._data`; GOWS puts sender metadata under `payload._data.Info`; NOWEB only
//! fills the top-level `payload` fields. Extraction walks from the nested object outwards.

use crate::channels::inbound::{InboundMessage, MessageKind, Provider, RejectReason};
use crate::channels::phone;
use crate::channels::registry::{ensure_success, DeviceCredentials, SendAdapter, SendError};
use crate::channels::wire::{first_present, opt_bool, opt_string};
use crate::reply::PartKind;
use async_trait::async_trait;
use serde::Deserialize;

const WAHA_API_BASE: &str = "http://127.0.0.1:3000";
const DEFAULT_SESSION: &str = "default";

/// Webhook envelope: `{ "event", "session", "payload" }`.
#[derive(Debug, Default, Deserialize)]
pub struct WahaEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub payload: Option<WahaMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WahaMessage {
    #[serde(default, deserialize_with = "opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub to: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub from_me: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub is_group: Option<bool>,
    #[serde(default)]
    pub notify_name: Option<String>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub has_media: Option<bool>,
    #[serde(default)]
    pub media: Option<WahaMedia>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default, rename = "_data")]
    pub data: Option<WahaData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WahaMedia {
    #[serde(default)]
    pub url: Option<String>,
}

/// Engine-specific raw message under `payload._data`.
#[derive(Debug, Default, Deserialize)]
pub struct WahaData {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub to: Option<String>,
    #[serde(default, rename = "notifyName")]
    pub notify_name: Option<String>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default, rename = "Info")]
    pub info: Option<WahaInfo>,
    #[serde(default, rename = "Message")]
    pub message: Option<WahaRawMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WahaInfo {
    #[serde(default, deserialize_with = "opt_string")]
    pub chat: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub sender: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub sender_alt: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub recipient_alt: Option<String>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub is_from_me: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub is_group: Option<bool>,
    #[serde(default)]
    pub push_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WahaRawMessage {
    #[serde(default)]
    pub conversation: Option<String>,
}

/// Events that carry an inbound (or operator-sent) chat message.
fn is_message_event(event: Option<&str>) -> bool {
    matches!(event, None | Some("message") | Some("message.any"))
}

/// Normalize a WAHA event into the canonical envelope.
pub fn normalize(device_id: &str, ev: &WahaEvent) -> Result<InboundMessage, RejectReason> {
    if !is_message_event(ev.event.as_deref()) {
        return Err(RejectReason::UnsupportedEvent(
            ev.event.clone().unwrap_or_default(),
        ));
    }
    let outer = ev
        .payload
        .as_ref()
        .ok_or(RejectReason::MissingField("payload"))?;
    let nested = outer.data.as_ref();
    if nested.is_none() {
        log::debug!("waha: no payload._data, reading payload directly");
    }
    let info = nested.and_then(|d| d.info.as_ref());

    let is_group = match info.and_then(|i| i.is_group) {
        Some(g) => g,
        None => outer.is_group.unwrap_or(false),
    };
    if is_group {
        return Err(RejectReason::Group);
    }
    let is_from_gateway = match info.and_then(|i| i.is_from_me) {
        Some(me) => me,
        None => outer.from_me.unwrap_or(false),
    };

    // Operator-sent messages carry the device's own number in `from`; the conversation
    // partner is the recipient.
    let partner = if is_from_gateway {
        first_present(&[
            ("payload._data.to", nested.and_then(|d| d.to.as_deref())),
            ("payload.to", outer.to.as_deref()),
            ("payload._data.Info.Chat", info.and_then(|i| i.chat.as_deref())),
        ])
    } else {
        None
    };
    let (path, raw_sender) = partner
        .or_else(|| {
            first_present(&[
                ("payload._data.from", nested.and_then(|d| d.from.as_deref())),
                ("payload.from", outer.from.as_deref()),
                ("payload._data.Info.Sender", info.and_then(|i| i.sender.as_deref())),
            ])
        })
        .ok_or(RejectReason::MissingField("from"))?;
    log::debug!(
        "waha: message {} on session {} sender taken from `{}`",
        outer.id.as_deref().unwrap_or("-"),
        ev.session.as_deref().unwrap_or(DEFAULT_SESSION),
        path
    );

    // A linked identity on an operator-sent message names the recipient, so its phone-number
    // alternate is `RecipientAlt`; `SenderAlt` is then the device itself.
    let sender_alt = info.and_then(|i| i.sender_alt.as_deref());
    let recipient_alt = info.and_then(|i| i.recipient_alt.as_deref());
    let alternates = if is_from_gateway {
        [recipient_alt, sender_alt]
    } else {
        [sender_alt, recipient_alt]
    };
    let sender_id = phone::resolve_sender(raw_sender, &alternates)?;

    let (path, text) = first_present(&[
        ("payload._data.body", nested.and_then(|d| d.body.as_deref())),
        ("payload.body", outer.body.as_deref()),
        (
            "payload._data.Message.conversation",
            nested
                .and_then(|d| d.message.as_ref())
                .and_then(|m| m.conversation.as_deref()),
        ),
    ])
    .ok_or(RejectReason::EmptyMessage)?;
    log::debug!("waha: text taken from `{}`", path);

    let sender_display_name = first_present(&[
        ("payload._data.Info.PushName", info.and_then(|i| i.push_name.as_deref())),
        ("payload._data.notifyName", nested.and_then(|d| d.notify_name.as_deref())),
        ("payload.notifyName", outer.notify_name.as_deref()),
    ])
    .map(|(_, n)| n.to_string())
    .unwrap_or_else(|| Provider::Waha.placeholder_name().to_string());

    let media_url = if outer.has_media.unwrap_or(false) {
        outer
            .media
            .as_ref()
            .and_then(|m| m.url.as_deref())
            .map(str::to_string)
    } else {
        None
    };
    let kind = MessageKind::from_provider(
        nested
            .and_then(|d| d.message_type.as_deref())
            .or(outer.message_type.as_deref()),
    );

    Ok(InboundMessage {
        device_id: device_id.to_string(),
        provider: Provider::Waha,
        sender_id,
        raw_sender_id: raw_sender.to_string(),
        text: text.to_string(),
        sender_display_name,
        is_group: false,
        is_from_gateway,
        kind,
        media_url,
        received_at: chrono::Utc::now(),
    })
}

/// WAHA send adapter. Chat ids are built as `<number>@c.us`; the API key goes in `X-Api-Key`.
pub struct WahaSender {
    client: reqwest::Client,
}

impl Default for WahaSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WahaSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn chat_id(to: &str) -> String {
        if to.contains('@') {
            to.to_string()
        } else {
            format!("{}@c.us", to)
        }
    }

    async fn post(
        &self,
        device: &DeviceCredentials,
        endpoint: &str,
        mut body: serde_json::Value,
    ) -> Result<(), SendError> {
        let url = format!("{}/api/{}", device.base_url_or(WAHA_API_BASE), endpoint);
        body["session"] = serde_json::Value::String(
            device
                .session
                .clone()
                .unwrap_or_else(|| DEFAULT_SESSION.to_string()),
        );
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = device.api_key.as_deref() {
            req = req.header("X-Api-Key", key);
        }
        let res = req.send().await?;
        ensure_success(res).await
    }
}

#[async_trait]
impl SendAdapter for WahaSender {
    fn provider(&self) -> Provider {
        Provider::Waha
    }

    async fn send_text(
        &self,
        device: &DeviceCredentials,
        to: &str,
        text: &str,
    ) -> Result<(), SendError> {
        let body = serde_json::json!({ "chatId": Self::chat_id(to), "text": text });
        self.post(device, "sendText", body).await
    }

    async fn send_image(
        &self,
        device: &DeviceCredentials,
        to: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<(), SendError> {
        let body = serde_json::json!({
            "chatId": Self::chat_id(to),
            "file": { "url": url },
            "caption": caption.unwrap_or(""),
        });
        self.post(device, "sendImage", body).await
    }

    async fn send_media(
        &self,
        device: &DeviceCredentials,
        to: &str,
        kind: PartKind,
        url: &str,
    ) -> Result<(), SendError> {
        let endpoint = match kind {
            PartKind::Audio => "sendVoice",
            PartKind::Video => "sendVideo",
            PartKind::Image => return self.send_image(device, to, url, None).await,
            PartKind::Text => return Err(SendError::UnsupportedKind("text")),
        };
        let body = serde_json::json!({ "chatId": Self::chat_id(to), "file": { "url": url } });
        self.post(device, endpoint, body).await
    }
}
