//! Session description codec.
//!
//! Descriptions travel through arbitrary helpers, including plain text
//! editors, so the decoder accepts a human JSON dialect: `//` and
//! `/* */` comments and trailing commas are stripped before strict
//! parsing. Encoding always produces strict JSON.

use serde_json::Value;
use thiserror::Error;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed description: {0}")]
    MalformedDescription(String),

    #[error("description is missing the `{0}` field")]
    MissingField(&'static str),
}

/// Serialize a description as strict JSON.
pub fn encode(desc: &RTCSessionDescription) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(desc).map_err(|err| CodecError::MalformedDescription(err.to_string()))
}

/// Parse a description, tolerating the human JSON dialect.
pub fn decode(data: &[u8]) -> Result<RTCSessionDescription, CodecError> {
    let normalized = normalize(data);

    let value: Value = serde_json::from_slice(&normalized)
        .map_err(|err| CodecError::MalformedDescription(err.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| CodecError::MalformedDescription("not a JSON object".into()))?;
    for field in ["type", "sdp"] {
        if !object.contains_key(field) {
            return Err(CodecError::MissingField(field));
        }
    }

    serde_json::from_value(value).map_err(|err| CodecError::MalformedDescription(err.to_string()))
}

/// Rewrite the human dialect into strict JSON: comments first, then
/// trailing commas. String literals pass through untouched.
fn normalize(input: &[u8]) -> Vec<u8> {
    strip_trailing_commas(&strip_comments(input))
}

fn strip_comments(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;

    while i < input.len() {
        let c = input[i];
        if in_string {
            out.push(c);
            if c == b'\\' && i + 1 < input.len() {
                out.push(input[i + 1]);
                i += 2;
                continue;
            }
            if c == b'"' {
                in_string = false;
            }
            i += 1;
        } else if c == b'"' {
            in_string = true;
            out.push(c);
            i += 1;
        } else if c == b'/' && input.get(i + 1) == Some(&b'/') {
            while i < input.len() && input[i] != b'\n' {
                i += 1;
            }
        } else if c == b'/' && input.get(i + 1) == Some(&b'*') {
            i += 2;
            while i < input.len() && !(input[i] == b'*' && input.get(i + 1) == Some(&b'/')) {
                i += 1;
            }
            i = (i + 2).min(input.len());
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}

fn strip_trailing_commas(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;

    while i < input.len() {
        let c = input[i];
        if in_string {
            out.push(c);
            if c == b'\\' && i + 1 < input.len() {
                out.push(input[i + 1]);
                i += 2;
                continue;
            }
            if c == b'"' {
                in_string = false;
            }
            i += 1;
        } else if c == b'"' {
            in_string = true;
            out.push(c);
            i += 1;
        } else if c == b',' {
            // A comma whose next significant byte closes the value is
            // the dialect's trailing comma; drop it.
            let mut j = i + 1;
            while j < input.len() && input[j].is_ascii_whitespace() {
                j += 1;
            }
            if matches!(input.get(j), Some(b'}') | Some(b']')) {
                i += 1;
            } else {
                out.push(c);
                i += 1;
            }
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}
