use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::INTERNAL_ERROR_DOMAIN;

/// Code paired with [`INTERNAL_ERROR_DOMAIN`] when an error could not be
/// serialized for transport.
pub const SERIALIZATION_FAILED_CODE: i32 = -99;

/// Code paired with [`INTERNAL_ERROR_DOMAIN`] when a received payload could
/// not be decoded.
pub const UNDECODABLE_PAYLOAD_CODE: i32 = -1;

/// Transport-safe projection of an error crossing the process boundary.
/// Only the domain, code, and message survive the crossing.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MarshaledError {
    pub domain: String,
    pub code: i32,
    pub message: String,
}

impl MarshaledError {
    pub fn new(domain: &str, code: i32, message: String) -> Self {
        MarshaledError {
            domain: domain.to_string(),
            code,
            message,
        }
    }

    fn serialization_failed() -> Self {
        MarshaledError::new(
            INTERNAL_ERROR_DOMAIN,
            SERIALIZATION_FAILED_CODE,
            "serialization failed".to_string(),
        )
    }

    /// Encode for transport. Never fails: if the error cannot be encoded, the
    /// payload describes that failure instead.
    pub fn to_payload(&self) -> Vec<u8> {
        const FALLBACK: &[u8] =
            br#"{"domain":"tidyd.internal","code":-99,"message":"serialization failed"}"#;

        match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(_) => {
                serde_json::to_vec(&MarshaledError::serialization_failed())
                    .unwrap_or_else(|_| FALLBACK.to_vec())
            }
        }
    }

    /// Decode from transport. Never fails: an undecodable payload becomes a
    /// generic error carrying the raw payload text so the description is not
    /// lost.
    pub fn from_payload(bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(error) => error,
            Err(_) => MarshaledError::new(
                INTERNAL_ERROR_DOMAIN,
                UNDECODABLE_PAYLOAD_CODE,
                String::from_utf8_lossy(bytes).into_owned(),
            ),
        }
    }
}

impl Display for MarshaledError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.domain, self.code, self.message)
    }
}

impl std::error::Error for MarshaledError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payload_round_trip() {
        let error = MarshaledError::new("X", 7, "boom".to_string());
        let decoded = MarshaledError::from_payload(&error.to_payload());
        assert_eq!(decoded, error);
    }

    #[test]
    fn undecodable_payload_keeps_description() {
        let decoded = MarshaledError::from_payload(b"not json at all");
        assert_eq!(decoded.domain, INTERNAL_ERROR_DOMAIN);
        assert_eq!(decoded.code, UNDECODABLE_PAYLOAD_CODE);
        assert_eq!(decoded.message, "not json at all");
    }

    #[test]
    fn foreign_domains_decode_as_is() {
        let decoded =
            MarshaledError::from_payload(br#"{"domain":"vendor.model","code":412,"message":"gpu"}"#);
        assert_eq!(decoded.domain, "vendor.model");
        assert_eq!(decoded.code, 412);
    }
}
