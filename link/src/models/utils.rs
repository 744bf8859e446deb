//! Serde helpers for loosely-typed wire fields.

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

/// Deserialize an optional identifier the server may send either as a JSON
/// string or as a number. Numbers are rendered in decimal.
pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s)),
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "opt_string_or_number")]
        sid: Option<String>,
    }

    #[test]
    fn test_accepts_string_and_number() {
        let p: Probe = serde_json::from_str(r#"{"sid":"abc"}"#).unwrap();
        assert_eq!(p.sid.as_deref(), Some("abc"));

        let p: Probe = serde_json::from_str(r#"{"sid":42}"#).unwrap();
        assert_eq!(p.sid.as_deref(), Some("42"));

        let p: Probe = serde_json::from_str(r#"{}"#).unwrap();
        assert!(p.sid.is_none());
    }

    #[test]
    fn test_rejects_objects() {
        assert!(serde_json::from_str::<Probe>(r#"{"sid":{"a":1}}"#).is_err());
    }
}
