use reqwest::header::HeaderValue;
use serde_json::Value;

const REDACTION: &str = "***REDACTED***";
const SENSITIVE_KEYS: [&str; 8] = [
    "api_key",
    "apikey",
    "token",
    "access_token",
    "authorization",
    "proxy-authorization",
    "secret",
    "password",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpDebugConfig {
    pub enabled: bool,
    pub redact_secrets: bool,
    pub max_body_chars: usize,
}

impl HttpDebugConfig {
    pub fn from_verbose(verbose: bool) -> Self {
        Self {
            enabled: verbose,
            redact_secrets: true,
            max_body_chars: 4_000,
        }
    }

    pub fn disabled() -> Self {
        Self::from_verbose(false)
    }
}

pub fn header_value_for_log(name: &str, value: &HeaderValue, redact: bool) -> String {
    if redact && is_sensitive_key(name) {
        return REDACTION.to_string();
    }
    value
        .to_str()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|_| "<non-utf8>".to_string())
}

/// Masks sensitive keys anywhere in a JSON body. Non-JSON text is returned as is.
pub fn body_for_log(raw: &str, redact: bool) -> String {
    if !redact {
        return raw.to_string();
    }

    let Ok(mut json) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    mask_sensitive(&mut json);
    serde_json::to_string(&json).unwrap_or_else(|_| raw.to_string())
}

pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        None => input.to_string(),
        Some((cut, _)) => format!(
            "{}... <truncated {} chars>",
            &input[..cut],
            input[cut..].chars().count()
        ),
    }
}

fn mask_sensitive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *item = Value::String(REDACTION.to_string());
                } else {
                    mask_sensitive(item);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_sensitive),
        _ => {}
    }
}

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(key))
}
