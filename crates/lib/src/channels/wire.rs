//! Lenient field decoding shared by the provider payload types.
//!
//! Gateways disagree on whether ids are strings or numbers and whether flags are booleans,
//! strings or integers, so payload fields go through these helpers.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accept a string or a number; anything else becomes `None`.
pub fn opt_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accept `true`/`false`, `"true"`/`"false"`, `1`/`0`.
pub fn opt_bool<'de, D>(d: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_i64().map(|i| i != 0),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// First candidate that is present and non-blank, with the path it came from.
pub fn first_present<'a>(
    candidates: &[(&'static str, Option<&'a str>)],
) -> Option<(&'static str, &'a str)> {
    candidates.iter().find_map(|(path, v)| {
        v.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (*path, s))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "opt_string")]
        id: Option<String>,
        #[serde(default, deserialize_with = "opt_bool")]
        flag: Option<bool>,
    }

    #[test]
    fn numbers_decode_as_strings() {
        let p: Probe = serde_json::from_str(r#"{"id": 60123456789, "flag": "true"}"#).unwrap();
        assert_eq!(p.id.as_deref(), Some("60123456789"));
        assert_eq!(p.flag, Some(true));
    }

    #[test]
    fn missing_fields_are_none() {
        let p: Probe = serde_json::from_str("{}").unwrap();
        assert!(p.id.is_none());
        assert!(p.flag.is_none());
    }

    #[test]
    fn first_present_skips_blank() {
        let got = first_present(&[("a", None), ("b", Some("  ")), ("c", Some(" x "))]);
        assert_eq!(got, Some(("c", "x")));
    }
}
