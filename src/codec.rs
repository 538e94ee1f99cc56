//! Conversion between operator-supplied values and websocket payloads.
//!
//! The codec is stateless apart from the optional custom formatter, which the
//! embedding program registers explicitly.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sonic_rs::JsonValueTrait;
use thiserror::Error;

use crate::core::WsFrame;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("JSON syntax error: {0}")]
    Syntax(String),

    #[error("Formatting failed: {0}")]
    Format(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Json,
    #[default]
    Text,
    Binary,
    Custom,
}

impl MessageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageFormat::Json => "json",
            MessageFormat::Text => "text",
            MessageFormat::Binary => "binary",
            MessageFormat::Custom => "custom",
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(MessageFormat::Json),
            "text" => Ok(MessageFormat::Text),
            "binary" => Ok(MessageFormat::Binary),
            "custom" => Ok(MessageFormat::Custom),
            other => Err(CodecError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// In-memory value handed to the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageValue {
    Text(String),
    Json(sonic_rs::Value),
    Bytes(Bytes),
}

impl From<&str> for MessageValue {
    fn from(s: &str) -> Self {
        MessageValue::Text(s.to_string())
    }
}

impl From<String> for MessageValue {
    fn from(s: String) -> Self {
        MessageValue::Text(s)
    }
}

/// Encoded payload ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WirePayload {
    Text(String),
    Binary(Bytes),
}

impl WirePayload {
    pub fn len(&self) -> usize {
        match self {
            WirePayload::Text(s) => s.len(),
            WirePayload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, WirePayload::Binary(_))
    }

    /// Send as a binary frame regardless of how the payload was produced.
    pub fn into_binary(self) -> WirePayload {
        match self {
            WirePayload::Text(s) => WirePayload::Binary(Bytes::from(s)),
            binary => binary,
        }
    }

    pub fn into_frame(self) -> WsFrame {
        match self {
            WirePayload::Text(s) => WsFrame::Text(Bytes::from(s)),
            WirePayload::Binary(b) => WsFrame::Binary(b),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Force a binary frame even for textual formats.
    pub binary: bool,
}

pub type CustomFormatter =
    Arc<dyn Fn(&MessageValue, &EncodeOptions) -> Result<WirePayload, String> + Send + Sync>;

#[derive(Serialize)]
struct Wrapped<'a> {
    message: &'a str,
}

#[derive(Clone, Default)]
pub struct Codec {
    custom: Option<CustomFormatter>,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_custom_formatter<F>(&mut self, formatter: F)
    where
        F: Fn(&MessageValue, &EncodeOptions) -> Result<WirePayload, String> + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(formatter));
    }

    pub fn clear_custom_formatter(&mut self) {
        self.custom = None;
    }

    pub fn has_custom_formatter(&self) -> bool {
        self.custom.is_some()
    }

    pub fn encode(
        &self,
        value: &MessageValue,
        format: MessageFormat,
        options: &EncodeOptions,
    ) -> Result<WirePayload, CodecError> {
        let payload = match format {
            MessageFormat::Json => WirePayload::Text(encode_json(value)?),
            MessageFormat::Text => WirePayload::Text(encode_text(value)?),
            MessageFormat::Binary => WirePayload::Binary(encode_binary(value)?),
            MessageFormat::Custom => {
                let custom = self
                    .custom
                    .as_ref()
                    .ok_or_else(|| CodecError::UnsupportedFormat("custom".to_string()))?;
                custom(value, options).map_err(CodecError::Format)?
            }
        };

        Ok(if options.binary {
            payload.into_binary()
        } else {
            payload
        })
    }

    pub fn decode(&self, wire: &WirePayload, format: MessageFormat) -> Result<MessageValue, CodecError> {
        match format {
            MessageFormat::Json => {
                let text = wire_text(wire)?;
                sonic_rs::from_str::<sonic_rs::Value>(text)
                    .map(MessageValue::Json)
                    .map_err(|e| CodecError::Syntax(e.to_string()))
            }
            MessageFormat::Text => match wire {
                WirePayload::Text(s) => Ok(MessageValue::Text(s.clone())),
                WirePayload::Binary(b) => Ok(MessageValue::Text(String::from_utf8_lossy(b).into_owned())),
            },
            MessageFormat::Binary => match wire {
                WirePayload::Text(s) => Ok(MessageValue::Bytes(Bytes::from(s.clone()))),
                WirePayload::Binary(b) => Ok(MessageValue::Bytes(b.clone())),
            },
            MessageFormat::Custom => Err(CodecError::UnsupportedFormat("custom".to_string())),
        }
    }
}

fn wire_text(wire: &WirePayload) -> Result<&str, CodecError> {
    match wire {
        WirePayload::Text(s) => Ok(s),
        WirePayload::Binary(b) => std::str::from_utf8(b).map_err(|e| CodecError::Syntax(e.to_string())),
    }
}

fn encode_json(value: &MessageValue) -> Result<String, CodecError> {
    let text = match value {
        MessageValue::Json(v) => {
            return sonic_rs::to_string(v).map_err(|e| CodecError::Format(e.to_string()));
        }
        MessageValue::Text(s) => s.as_str(),
        MessageValue::Bytes(b) => std::str::from_utf8(b)
            .map_err(|_| CodecError::Format("binary payload is not valid UTF-8".to_string()))?,
    };

    match sonic_rs::from_str::<sonic_rs::Value>(text) {
        Ok(parsed) => sonic_rs::to_string(&parsed).map_err(|e| CodecError::Format(e.to_string())),
        Err(_) => sonic_rs::to_string(&Wrapped { message: text })
            .map_err(|e| CodecError::Format(e.to_string())),
    }
}

fn encode_text(value: &MessageValue) -> Result<String, CodecError> {
    match value {
        MessageValue::Text(s) => Ok(s.clone()),
        MessageValue::Json(v) => match v.as_str() {
            Some(s) => Ok(s.to_string()),
            None => sonic_rs::to_string(v).map_err(|e| CodecError::Format(e.to_string())),
        },
        MessageValue::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
    }
}

fn encode_binary(value: &MessageValue) -> Result<Bytes, CodecError> {
    match value {
        MessageValue::Bytes(b) => Ok(b.clone()),
        MessageValue::Text(s) => Ok(text_to_bytes(s)),
        MessageValue::Json(v) => match v.as_str() {
            Some(s) => Ok(text_to_bytes(s)),
            None => sonic_rs::to_string(v)
                .map(Bytes::from)
                .map_err(|e| CodecError::Format(e.to_string())),
        },
    }
}

/// Standard alphabet that tolerates non-zero bits after the last full byte.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

fn text_to_bytes(s: &str) -> Bytes {
    if looks_like_base64(s)
        && let Ok(decoded) = LENIENT.decode(s)
        && !decoded.is_empty()
    {
        return Bytes::from(decoded);
    }
    Bytes::copy_from_slice(s.as_bytes())
}

/// Heuristic for text that is probably base64: standard alphabet, at most two
/// trailing `=`, length a positive multiple of 4, and either a `+`/`/` or at
/// least 8 characters.
pub fn looks_like_base64(s: &str) -> bool {
    if s.is_empty() || s.len() % 4 != 0 {
        return false;
    }
    let body = s.trim_end_matches('=');
    if s.len() - body.len() > 2 {
        return false;
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
    {
        return false;
    }
    body.contains(['+', '/']) || s.len() >= 8
}

/// Pretty-print structured text for display, or return it unchanged.
pub fn pretty(text: &str) -> String {
    sonic_rs::from_str::<sonic_rs::Value>(text)
        .and_then(|v| sonic_rs::to_string_pretty(&v))
        .unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: impl Into<MessageValue>, format: MessageFormat) -> Result<WirePayload, CodecError> {
        Codec::new().encode(&value.into(), format, &EncodeOptions::default())
    }

    #[test]
    fn json_wraps_unparsable_text() {
        assert_eq!(
            encode("not json", MessageFormat::Json).unwrap(),
            WirePayload::Text(r#"{"message":"not json"}"#.to_string())
        );
    }

    #[test]
    fn json_normalizes_parsable_text() {
        assert_eq!(
            encode("{ \"a\" : [1, 2] }", MessageFormat::Json).unwrap(),
            WirePayload::Text(r#"{"a":[1,2]}"#.to_string())
        );
    }

    #[test]
    fn json_rejects_non_utf8_bytes() {
        let err = encode(MessageValue::Bytes(Bytes::from_static(&[0xff, 0xfe])), MessageFormat::Json)
            .unwrap_err();
        assert!(matches!(err, CodecError::Format(_)));
    }

    #[test]
    fn text_coerces_json_values() {
        let value: sonic_rs::Value = sonic_rs::from_str(r#"{"k":true}"#).unwrap();
        assert_eq!(
            encode(MessageValue::Json(value), MessageFormat::Text).unwrap(),
            WirePayload::Text(r#"{"k":true}"#.to_string())
        );
    }

    #[test]
    fn binary_decodes_base64_looking_text() {
        assert_eq!(
            encode("3q2+7w==", MessageFormat::Binary).unwrap(),
            WirePayload::Binary(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]))
        );
        // Long enough without marker characters.
        assert_eq!(
            encode("aGVsbG8h", MessageFormat::Binary).unwrap(),
            WirePayload::Binary(Bytes::from_static(b"hello!"))
        );
        // Leftover bits after the last byte are ignored, not a reason to fall back.
        assert_eq!(
            encode("aaaaaa==", MessageFormat::Binary).unwrap(),
            WirePayload::Binary(Bytes::from_static(&[0x69, 0xa6, 0x9a, 0x69]))
        );
    }

    #[test]
    fn binary_keeps_plain_text_as_utf8() {
        // Valid alphabet and length, but short and without markers.
        assert_eq!(
            encode("abcd", MessageFormat::Binary).unwrap(),
            WirePayload::Binary(Bytes::from_static(b"abcd"))
        );
        assert_eq!(
            encode("hello world", MessageFormat::Binary).unwrap(),
            WirePayload::Binary(Bytes::from_static(b"hello world"))
        );
    }

    #[test]
    fn base64_heuristic_edges() {
        assert!(looks_like_base64("ab+/"));
        assert!(!looks_like_base64(""));
        assert!(!looks_like_base64("abc"));
        assert!(!looks_like_base64("a==="));
        assert!(!looks_like_base64("abc-defg"));
    }

    #[test]
    fn custom_without_formatter_is_unsupported() {
        assert_eq!(
            encode("x", MessageFormat::Custom).unwrap_err(),
            CodecError::UnsupportedFormat("custom".to_string())
        );
    }

    #[test]
    fn custom_failures_become_format_errors() {
        let mut codec = Codec::new();
        codec.set_custom_formatter(|value, _| match value {
            MessageValue::Text(s) if s == "boom" => Err("exploded".to_string()),
            MessageValue::Text(s) => Ok(WirePayload::Text(s.to_uppercase())),
            _ => Err("text only".to_string()),
        });
        let options = EncodeOptions::default();

        assert_eq!(
            codec.encode(&"hi".into(), MessageFormat::Custom, &options).unwrap(),
            WirePayload::Text("HI".to_string())
        );
        assert_eq!(
            codec.encode(&"boom".into(), MessageFormat::Custom, &options).unwrap_err(),
            CodecError::Format("exploded".to_string())
        );

        assert!(codec.has_custom_formatter());
        codec.clear_custom_formatter();
        assert!(!codec.has_custom_formatter());
    }

    #[test]
    fn binary_option_forces_binary_frame() {
        let payload = Codec::new()
            .encode(&"hi".into(), MessageFormat::Text, &EncodeOptions { binary: true })
            .unwrap();
        assert_eq!(payload, WirePayload::Binary(Bytes::from_static(b"hi")));
    }

    #[test]
    fn decode_json_reports_syntax_errors() {
        let codec = Codec::new();
        let err = codec
            .decode(&WirePayload::Text("{oops".into()), MessageFormat::Json)
            .unwrap_err();
        assert!(matches!(err, CodecError::Syntax(_)));
        assert_eq!("xml".parse::<MessageFormat>().unwrap_err(), CodecError::UnsupportedFormat("xml".into()));
    }

    #[test]
    fn pretty_falls_back_to_raw_text() {
        assert_eq!(pretty("plain"), "plain");
        assert!(pretty(r#"{"a":1}"#).contains('\n'));
    }
}
