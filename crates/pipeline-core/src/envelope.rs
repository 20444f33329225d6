//! Wire framing for queue payloads.
//!
//! The original system base64-encoded raw JSON ad hoc at every call site. Here that is
//! standardized into a single `Envelope<T>` so stage handlers only ever see a decoded
//! `T` -- framing lives in one place.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty payload")]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self { version: ENVELOPE_VERSION, payload }
    }

    /// base64(utf8(json(self))) -- survives queue transports that mangle raw JSON.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("envelope payload must serialize");
        BASE64.encode(json)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decode a base64-wrapped envelope. Empty or malformed input is reported distinctly
    /// so the caller can log a poison-quarantine entry rather than retry.
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        if raw.trim().is_empty() {
            return Err(EnvelopeError::Empty);
        }
        let bytes = BASE64.decode(raw.trim())?;
        let text = String::from_utf8(bytes)?;
        let envelope: Envelope<T> = serde_json::from_str(&text)?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        a: String,
        b: i32,
    }

    #[test]
    fn round_trip() {
        let envelope = Envelope::new(Payload { a: "x".into(), b: 7 });
        let encoded = envelope.encode();
        let decoded: Envelope<Payload> = Envelope::decode(&encoded).unwrap();
        assert_eq!(decoded.payload, envelope.payload);
        assert_eq!(decoded.version, 1);
    }

    #[test]
    fn empty_payload_is_poison() {
        let err = Envelope::<Payload>::decode("").unwrap_err();
        assert!(matches!(err, EnvelopeError::Empty));
    }

    #[test]
    fn malformed_base64_is_poison() {
        let err = Envelope::<Payload>::decode("not-valid-base64!!").unwrap_err();
        assert!(matches!(err, EnvelopeError::Base64(_)));
    }

    #[test]
    fn malformed_json_is_poison() {
        let encoded = BASE64.encode(b"not json");
        let err = Envelope::<Payload>::decode(&encoded).unwrap_err();
        assert!(matches!(err, EnvelopeError::Json(_)));
    }
}
