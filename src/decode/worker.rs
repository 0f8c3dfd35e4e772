//! Decode worker
//!
//! Runs on a dedicated pool thread. Each job arrives as a serialized
//! [`DecodeRequest`] and leaves as a serialized [`DecodeResponse`]; nothing
//! else is shared with the caller.

use bytes::Bytes;

use super::codec::{self, EncodingChain};
use super::protocol::{DecodeRequest, DecodeResponse};
use super::DecodeError;

/// Undo every encoding in `encoding_header`, last applied first.
///
/// The first failing step fails the whole job; later steps are not attempted.
pub fn decode(body: Bytes, encoding_header: Option<&str>) -> Result<Bytes, DecodeError> {
    decode_with_limit(body, encoding_header, None)
}

pub fn decode_with_limit(
    body: Bytes,
    encoding_header: Option<&str>,
    max_decoded_bytes: Option<usize>,
) -> Result<Bytes, DecodeError> {
    let chain = EncodingChain::parse(encoding_header);
    let decoded = chain.decode_order().try_fold(body, |current, token| {
        codec::apply(token, current, max_decoded_bytes)
    });
    decoded
}

/// Handle one serialized request and produce the serialized response.
///
/// Errors here mean the message itself could not be read or written; they
/// are transport failures, not decode failures.
pub fn handle_message(message: &str) -> anyhow::Result<String> {
    let request = DecodeRequest::from_message(message)?;
    let result = decode_with_limit(
        request.body,
        request.encoding.as_deref(),
        request.max_decoded_bytes,
    );
    if let Err(err) = &result {
        tracing::debug!("decode job failed: {}", err);
    }
    Ok(DecodeResponse::from(result).to_message()?)
}
