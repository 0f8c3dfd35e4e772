use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a decode job can fail.
///
/// Serialisable so the worker can hand the failure back across the message
/// boundary without losing its kind.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeError {
    /// Encoding token outside the supported codec set
    #[error("Unknown encoding: {encoding}")]
    UnknownEncoding { encoding: String },

    /// A recognised codec rejected its input as corrupt
    #[error("Failed to decode {encoding} body: {message}")]
    Decompression { encoding: String, message: String },

    /// A decoding stage produced more than the configured output cap
    #[error("Decoded {encoding} body exceeds limit of {limit} bytes")]
    OutputTooLarge { encoding: String, limit: usize },

    /// The worker never returned a result
    #[error("Decode worker failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },
}

impl DecodeError {
    pub fn unknown_encoding(token: &str) -> Self {
        DecodeError::UnknownEncoding {
            encoding: token.to_string(),
        }
    }

    /// Codec errors are deterministic for the same bytes; only transport
    /// failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DecodeError::Transport { .. })
    }
}
