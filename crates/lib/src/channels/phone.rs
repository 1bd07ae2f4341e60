//! Sender id cleanup: strip gateway suffixes, and resolve linked-identity senders to a phone number.

use crate::channels::inbound::RejectReason;

/// Suffixes that mark an individual contact id (e.g. `60123456789@c.us`).
pub const CONTACT_SUFFIXES: [&str; 2] = ["@c.us", "@s.whatsapp.net"];
pub const GROUP_SUFFIX: &str = "@g.us";
/// Linked-identity ids are not phone numbers and must be resolved through an alternate field.
pub const LINKED_IDENTITY_SUFFIX: &str = "@lid";
/// Longest stripped id accepted without a second pass.
pub const MAX_PHONE_LEN: usize = 13;

pub fn has_contact_suffix(raw: &str) -> bool {
    let raw = raw.trim();
    CONTACT_SUFFIXES.iter().any(|s| raw.ends_with(s))
}

pub fn is_group_id(raw: &str) -> bool {
    raw.trim().ends_with(GROUP_SUFFIX)
}

/// Strip a contact suffix, the `:device` qualifier that may precede it, and a leading `+`.
/// Ids without a contact suffix are only trimmed and unprefixed.
pub fn strip_contact_suffix(raw: &str) -> String {
    let mut s = raw.trim();
    for suffix in CONTACT_SUFFIXES {
        if let Some(rest) = s.strip_suffix(suffix) {
            s = rest.split(':').next().unwrap_or(rest);
            break;
        }
    }
    s.trim_start_matches('+').to_string()
}

/// Turn a raw sender into a clean phone-like id.
///
/// `alternates` are tried in order when the raw id is a linked identity; the first one that
/// carries a contact suffix wins.
pub fn resolve_sender(raw: &str, alternates: &[Option<&str>]) -> Result<String, RejectReason> {
    if is_group_id(raw) {
        return Err(RejectReason::Group);
    }
    let stripped = strip_contact_suffix(raw);
    if stripped.is_empty() {
        return Err(RejectReason::MissingField("sender"));
    }
    if stripped.chars().count() <= MAX_PHONE_LEN {
        return Ok(stripped);
    }

    let raw = raw.trim();
    if raw.ends_with(LINKED_IDENTITY_SUFFIX) {
        for alt in alternates.iter().flatten() {
            if !has_contact_suffix(alt) {
                continue;
            }
            let id = strip_contact_suffix(alt);
            if !id.is_empty() {
                log::debug!("phone: resolved linked identity {} to {}", raw, id);
                return Ok(id);
            }
        }
        log::warn!("phone: no alternate identity for {}", raw);
        return Err(RejectReason::IdentityResolutionFailed);
    }
    Err(RejectReason::UnknownPhoneFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_contact_suffixes_and_device_qualifier() {
        assert_eq!(strip_contact_suffix("60123456789@c.us"), "60123456789");
        assert_eq!(strip_contact_suffix("60123456789:12@s.whatsapp.net"), "60123456789");
        assert_eq!(strip_contact_suffix("+60123456789"), "60123456789");
        assert_eq!(strip_contact_suffix("98765@lid"), "98765@lid");
    }

    #[test]
    fn short_ids_pass_first_pass() {
        assert_eq!(resolve_sender("60123456789@c.us", &[]).unwrap(), "60123456789");
        assert_eq!(resolve_sender("6281234567890", &[]).unwrap(), "6281234567890");
    }

    #[test]
    fn group_ids_are_rejected() {
        assert_eq!(
            resolve_sender("120363025246125888@g.us", &[]),
            Err(RejectReason::Group)
        );
    }

    #[test]
    fn linked_identity_resolves_through_first_contact_alternate() {
        let got = resolve_sender(
            "174114529718412@lid",
            &[None, Some("99887766554433@lid"), Some("60129998888@s.whatsapp.net")],
        );
        assert_eq!(got.unwrap(), "60129998888");
    }

    #[test]
    fn linked_identity_without_alternate_fails() {
        assert_eq!(
            resolve_sender("174114529718412@lid", &[None, Some("")]),
            Err(RejectReason::IdentityResolutionFailed)
        );
    }

    #[test]
    fn long_unknown_format_is_rejected() {
        assert_eq!(
            resolve_sender("12345678901234567@broadcast", &[]),
            Err(RejectReason::UnknownPhoneFormat)
        );
    }

    #[test]
    fn empty_sender_is_missing() {
        assert_eq!(resolve_sender("  ", &[]), Err(RejectReason::MissingField("sender")));
    }
}
