//! Provider-tagged normalization entry points.
//!
//! `normalize` parses a raw webhook body into the provider's typed payload and runs its
//! extraction chain. `from_normalized` is the generic entry for callers that already did
//! their own extraction and hand over a flat field map.

use crate::channels::inbound::{InboundMessage, MessageKind, Provider, RejectReason};
use crate::channels::wire::{first_present, opt_bool, opt_string};
use crate::channels::{phone, waha, wablas, whacenter};
use serde::de::DeserializeOwned;
use serde::Deserialize;

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, RejectReason> {
    serde_json::from_slice(body).map_err(|e| RejectReason::Malformed(e.to_string()))
}

fn require_device(device_id: &str) -> Result<&str, RejectReason> {
    let d = device_id.trim();
    if d.is_empty() {
        Err(RejectReason::MissingField("deviceId"))
    } else {
        Ok(d)
    }
}

/// Normalize a raw webhook body for `provider`.
pub fn normalize(
    provider: Provider,
    device_id: &str,
    body: &[u8],
) -> Result<InboundMessage, RejectReason> {
    let device_id = require_device(device_id)?;
    match provider {
        Provider::Wablas => wablas::normalize(device_id, &parse(body)?),
        Provider::Whacenter => whacenter::normalize(device_id, &parse(body)?),
        Provider::Waha => waha::normalize(device_id, &parse(body)?),
    }
}

/// Already-extracted fields, as posted to the internal entry point.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPayload {
    #[serde(default, deserialize_with = "opt_string")]
    pub sender_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub raw_sender_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub is_group: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub is_from_gateway: Option<bool>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

/// Build an envelope from an already-normalized field map.
///
/// The sender still goes through suffix stripping so a caller passing a raw id gets the
/// same group and linked-identity rejections as the provider paths.
pub fn from_normalized(
    provider: Provider,
    device_id: &str,
    fields: serde_json::Value,
) -> Result<InboundMessage, RejectReason> {
    let device_id = require_device(device_id)?;
    let p: NormalizedPayload =
        serde_json::from_value(fields).map_err(|e| RejectReason::Malformed(e.to_string()))?;

    let (_, raw_sender) = first_present(&[
        ("rawSenderId", p.raw_sender_id.as_deref()),
        ("senderId", p.sender_id.as_deref()),
    ])
    .ok_or(RejectReason::MissingField("senderId"))?;
    if p.is_group == Some(true) {
        return Err(RejectReason::Group);
    }
    let sender_id = phone::resolve_sender(raw_sender, &[p.sender_id.as_deref()])?;
    let (_, text) =
        first_present(&[("text", p.text.as_deref())]).ok_or(RejectReason::EmptyMessage)?;

    Ok(InboundMessage {
        device_id: device_id.to_string(),
        provider,
        sender_id,
        raw_sender_id: raw_sender.to_string(),
        text: text.to_string(),
        sender_display_name: first_present(&[("senderName", p.sender_name.as_deref())])
            .map(|(_, n)| n.to_string())
            .unwrap_or_else(|| provider.placeholder_name().to_string()),
        is_group: false,
        is_from_gateway: p.is_from_gateway.unwrap_or(false),
        kind: MessageKind::from_provider(p.message_type.as_deref()),
        media_url: p.media_url.filter(|u| !u.trim().is_empty()),
        received_at: chrono::Utc::now(),
    })
}
