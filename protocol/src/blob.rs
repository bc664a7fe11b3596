//! Text-safe transform applied to the JSON documents carried inside an envelope.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::envelope::ParseFailure;

/// Serialize `value` to JSON and base64 the UTF-8 bytes.
pub(crate) fn to_blob(value: &Value) -> String {
    STANDARD.encode(value.to_string())
}

/// Reverse of [`to_blob`]. An empty blob stands for an absent payload and yields `null`.
pub(crate) fn from_blob(blob: &str) -> Result<Value, ParseFailure> {
    if blob.is_empty() {
        return Ok(Value::Null);
    }
    let bytes = STANDARD.decode(blob)?;
    let text = String::from_utf8(bytes)?;
    serde_json::from_str(&text).map_err(ParseFailure::PayloadNotJson)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn blob_is_plain_base64_of_the_json_text() {
        let value = json!({"type": "offer", "sdp": "v=0"});
        assert_eq!(
            to_blob(&value),
            STANDARD.encode(r#"{"sdp":"v=0","type":"offer"}"#)
        );
    }

    #[test]
    fn non_ascii_documents_survive() {
        let value = json!({"label": "caméra ✓"});
        assert_eq!(from_blob(&to_blob(&value)).unwrap(), value);
    }

    #[test]
    fn empty_blob_is_null() {
        assert_eq!(from_blob("").unwrap(), Value::Null);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(from_blob("%%%"), Err(ParseFailure::Base64(_))));
        let not_utf8 = STANDARD.encode([0xff_u8, 0xfe]);
        assert!(matches!(
            from_blob(&not_utf8),
            Err(ParseFailure::PayloadNotUtf8(_))
        ));
        let not_json = STANDARD.encode("{oops");
        assert!(matches!(
            from_blob(&not_json),
            Err(ParseFailure::PayloadNotJson(_))
        ));
    }
}
