//! Masking of sensitive values in structures before they reach the logs.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

pub const REDACTED: &str = "[REDACTED]";

fn sensitive_key() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)(password|passwd|token|secret|session|card|ssn|cvv|authorization|cookie|api[_-]?key|private[_-]?key)",
            )
            .ok()
        })
        .as_ref()
}

/// Whether a field name should have its value masked.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    // Fail closed if the pattern could not be built.
    sensitive_key().map_or(true, |re| re.is_match(key))
}

/// Recursively mask values stored under sensitive keys.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *inner = Value::String(REDACTED.to_string());
                } else {
                    redact_value(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {}
    }
}

/// `Display` wrapper that serializes `T` to JSON with sensitive keys masked.
///
/// ```ignore
/// debug!(payload = %Redacted(&request), "login request");
/// ```
pub struct Redacted<'a, T: Serialize>(pub &'a T);

impl<T: Serialize> fmt::Display for Redacted<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self.0) {
            Ok(mut value) => {
                redact_value(&mut value);
                write!(f, "{value}")
            }
            Err(_) => f.write_str(REDACTED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_nested_sensitive_keys() {
        let mut value = json!({
            "email": "ada@example.com",
            "idToken": "eyJhbGciOi",
            "profile": {
                "name": "Ada",
                "creditCard": "4111",
                "devices": [{ "sessionId": "abc", "type": "mobile" }]
            },
            "headers": { "Authorization": "Bearer x", "X-Api-Key": "k" }
        });
        redact_value(&mut value);

        assert_eq!(value["email"], "ada@example.com");
        assert_eq!(value["idToken"], REDACTED);
        assert_eq!(value["profile"]["name"], "Ada");
        assert_eq!(value["profile"]["creditCard"], REDACTED);
        assert_eq!(value["profile"]["devices"][0]["sessionId"], REDACTED);
        assert_eq!(value["profile"]["devices"][0]["type"], "mobile");
        assert_eq!(value["headers"]["Authorization"], REDACTED);
        assert_eq!(value["headers"]["X-Api-Key"], REDACTED);
    }

    #[test]
    fn sensitive_object_is_replaced_whole() {
        let mut value = json!({ "secrets": { "a": 1 } });
        redact_value(&mut value);
        assert_eq!(value["secrets"], REDACTED);
    }

    #[test]
    fn display_wrapper_redacts() {
        #[derive(Serialize)]
        struct Login<'a> {
            email: &'a str,
            password: &'a str,
        }
        let rendered = Redacted(&Login {
            email: "a@b.c",
            password: "hunter2",
        })
        .to_string();
        assert!(rendered.contains("a@b.c"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn key_matching_is_case_insensitive() {
        assert!(is_sensitive_key("PRIVATE_KEY"));
        assert!(is_sensitive_key("api-key"));
        assert!(is_sensitive_key("Cookie"));
        assert!(!is_sensitive_key("email"));
        assert!(!is_sensitive_key("role"));
    }
}
