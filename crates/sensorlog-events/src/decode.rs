//! Payload decoding for raw broker messages.

use serde_json::{Map, Value};

/// Field that carries the decoded text when a payload is not JSON.
pub const RAW_FIELD: &str = "raw";

/// Turns a raw message body into a JSON payload.
///
/// Invalid UTF-8 is replaced with U+FFFD. Text that parses as JSON is
/// returned as-is; anything else (including an empty body, a bare `null`
/// and a body with a leading byte-order mark) is wrapped as
/// `{"raw": "<text>"}`. Never fails and never returns `Value::Null`.
pub fn decode(raw: &[u8]) -> Value {
    let text = String::from_utf8_lossy(raw);

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Null) | Err(_) => fallback(&text),
        Ok(value) => value,
    }
}

fn fallback(text: &str) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(RAW_FIELD.to_string(), Value::String(text.to_string()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn decodes_json_object() {
        assert_eq!(decode(br#"{"ppm": 42}"#), json!({"ppm": 42}));
    }

    #[test]
    fn decodes_json_scalars_and_arrays() {
        assert_eq!(decode(b"42"), json!(42));
        assert_eq!(decode(b"\"on\""), json!("on"));
        assert_eq!(decode(b"[1, 2]"), json!([1, 2]));
        assert_eq!(decode(b"true"), json!(true));
    }

    #[test]
    fn wraps_non_json_text() {
        assert_eq!(decode(b"not-json"), json!({"raw": "not-json"}));
    }

    #[test]
    fn wraps_empty_body() {
        assert_eq!(decode(b""), json!({"raw": ""}));
    }

    #[test]
    fn wraps_json_null() {
        assert_eq!(decode(b"null"), json!({"raw": "null"}));
    }

    #[test]
    fn replaces_invalid_utf8() {
        let payload = decode(&[b'o', b'k', 0xff, 0xfe]);
        assert_eq!(payload, json!({"raw": "ok\u{fffd}\u{fffd}"}));
    }

    #[test]
    fn invalid_utf8_inside_json_string_still_parses() {
        let payload = decode(b"{\"name\": \"a\xffb\"}");
        assert_eq!(payload, json!({"name": "a\u{fffd}b"}));
    }

    #[test]
    fn byte_order_mark_is_kept_under_raw() {
        assert_eq!(
            decode("\u{feff}{\"a\":1}".as_bytes()),
            json!({"raw": "\u{feff}{\"a\":1}"})
        );
    }

    #[test]
    fn truncated_json_falls_back() {
        assert_eq!(decode(br#"{"ppm": 4"#), json!({"raw": "{\"ppm\": 4"}));
    }

    proptest! {
        #[test]
        fn never_returns_null(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert!(!decode(&bytes).is_null());
        }

        #[test]
        fn valid_json_matches_direct_parse(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8),
            label in "\\PC{0,16}",
        ) {
            let doc = json!({ "entries": entries, "label": label });
            let text = serde_json::to_string(&doc).unwrap();
            let direct: Value = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(decode(text.as_bytes()), direct);
        }

        #[test]
        fn non_json_text_is_preserved_under_raw(text in "[a-z][a-z -]{0,31}") {
            prop_assume!(!matches!(text.trim(), "true" | "false" | "null"));
            prop_assert_eq!(decode(text.as_bytes()), json!({ RAW_FIELD: text }));
        }
    }
}
