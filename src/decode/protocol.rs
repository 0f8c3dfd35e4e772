//! Worker boundary messages
//!
//! Requests and responses cross to the decode workers as self-contained JSON
//! strings; bodies travel base64-encoded so no buffer is shared with the caller.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::DecodeError;

/// A decode request as seen by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeRequest {
    #[serde(with = "base64_body")]
    pub body: Bytes,
    /// Raw `content-encoding` header value
    pub encoding: Option<String>,
    /// Cap on the size of any decoded stage
    pub max_decoded_bytes: Option<usize>,
}

/// A worker's answer to one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecodeResponse {
    Success {
        #[serde(with = "base64_body")]
        body: Bytes,
    },
    Failure {
        error: DecodeError,
    },
}

impl DecodeRequest {
    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_message(message: &str) -> serde_json::Result<Self> {
        serde_json::from_str(message)
    }
}

impl DecodeResponse {
    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_message(message: &str) -> serde_json::Result<Self> {
        serde_json::from_str(message)
    }

    pub fn into_result(self) -> Result<Bytes, DecodeError> {
        match self {
            DecodeResponse::Success { body } => Ok(body),
            DecodeResponse::Failure { error } => Err(error),
        }
    }
}

impl From<Result<Bytes, DecodeError>> for DecodeResponse {
    fn from(result: Result<Bytes, DecodeError>) -> Self {
        match result {
            Ok(body) => DecodeResponse::Success { body },
            Err(error) => DecodeResponse::Failure { error },
        }
    }
}

mod base64_body {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
