//! Redaction of confidential request payloads before auditing

use serde_json::Value;

/// Replacement for every confidential value
pub const REDACTED: &str = "[REDACTED]";

// Objects whose every value is confidential (Secret and ConfigMap payloads)
const REDACTED_OBJECTS: &[&str] = &["data", "stringData", "binaryData"];

const REDACTED_KEYS: &[&str] = &[
    "password",
    "apikey",
    "api_key",
    "token",
    "accesstoken",
    "refreshtoken",
];

fn is_confidential_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    REDACTED_KEYS.contains(&key.as_str())
}

/// Replace confidential fields of a JSON document in place
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if REDACTED_OBJECTS.contains(&key.as_str()) {
                    redact_all(value);
                } else if is_confidential_key(key) {
                    *value = Value::String(REDACTED.to_string());
                } else {
                    redact_value(value);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {}
    }
}

// Keys stay visible, every leaf is replaced
fn redact_all(value: &mut Value) {
    match value {
        Value::Object(map) => map.values_mut().for_each(redact_all),
        Value::Array(items) => items.iter_mut().for_each(redact_all),
        Value::Null => {}
        _ => *value = Value::String(REDACTED.to_string()),
    }
}

/// Audit form of a request body
///
/// JSON and YAML bodies are parsed, redacted and re-encoded as JSON. Anything
/// else (protobuf, octet streams, unparseable text) is replaced entirely.
pub fn redact_payload(content_type: Option<&str>, body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }

    let content_type = content_type.unwrap_or("application/json").to_ascii_lowercase();
    let parsed: Option<Value> = if content_type.contains("yaml") {
        serde_yaml::from_slice(body).ok()
    } else if content_type.contains("json") {
        serde_json::from_slice(body).ok()
    } else {
        None
    };

    match parsed {
        Some(mut value) => {
            redact_value(&mut value);
            serde_json::to_string(&value).unwrap_or_else(|_| REDACTED.to_string())
        }
        None => REDACTED.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn redacted(value: Value) -> Value {
        let body = serde_json::to_vec(&value).unwrap();
        serde_json::from_str(&redact_payload(Some("application/json"), &body)).unwrap()
    }

    #[test]
    fn test_secret_string_data_is_redacted() {
        let out = redacted(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "db", "namespace": "team-a"},
            "stringData": {"key": "secret-value"},
        }));
        assert_eq!(out["stringData"]["key"], REDACTED);
        assert_eq!(out["metadata"]["name"], "db");
    }

    #[test]
    fn test_nested_credentials_are_redacted() {
        let out = redacted(json!({
            "spec": {
                "containers": [{
                    "env": [{"name": "X", "password": "hunter2"}],
                }],
                "auth": {"apiKey": "k", "refreshToken": "r", "user": "bob"},
            },
            "data": {"tls.crt": "LS0t", "nested": {"a": 1}},
        }));
        assert_eq!(out["spec"]["containers"][0]["env"][0]["password"], REDACTED);
        assert_eq!(out["spec"]["containers"][0]["env"][0]["name"], "X");
        assert_eq!(out["spec"]["auth"]["apiKey"], REDACTED);
        assert_eq!(out["spec"]["auth"]["refreshToken"], REDACTED);
        assert_eq!(out["spec"]["auth"]["user"], "bob");
        assert_eq!(out["data"]["tls.crt"], REDACTED);
        assert_eq!(out["data"]["nested"]["a"], REDACTED);
    }

    #[test]
    fn test_yaml_body_is_parsed_then_redacted() {
        let body = b"kind: Secret\nstringData:\n  key: secret-value\n";
        let out: Value =
            serde_json::from_str(&redact_payload(Some("application/yaml"), body)).unwrap();
        assert_eq!(out["kind"], "Secret");
        assert_eq!(out["stringData"]["key"], REDACTED);
    }

    #[test]
    fn test_merge_patch_is_json() {
        let body = br#"{"data":{"k":"v"}}"#;
        let out = redact_payload(Some("application/merge-patch+json"), body);
        assert!(!out.contains("\"v\""));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn test_binary_body_is_replaced() {
        assert_eq!(
            redact_payload(Some("application/vnd.kubernetes.protobuf"), &[0x6b, 0x38, 0x73, 0x00]),
            REDACTED
        );
        assert_eq!(redact_payload(Some("application/json"), &[0xff, 0xfe]), REDACTED);
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(redact_payload(None, b""), "");
    }
}
