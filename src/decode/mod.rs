//! Body decoding
//!
//! Content-encoding chains are undone off the caller's thread: the
//! [`DecodeDispatcher`] hands serialized jobs to a pool of worker threads and
//! returns one future per job.

pub mod codec;
pub mod dispatcher;
mod error;
pub mod protocol;
pub mod worker;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::models::{Exchange, ExchangeId};

pub use codec::{Codec, EncodingChain};
pub use dispatcher::{DecodeDispatcher, DispatcherConfig};
pub use error::DecodeError;

/// One unit of decode work for a single exchange
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub exchange_id: ExchangeId,
    pub body: Bytes,
    /// Raw `content-encoding` header value
    pub content_encoding: Option<String>,
}

impl DecodeJob {
    pub fn for_exchange(exchange: &Exchange) -> Self {
        Self {
            exchange_id: exchange.id(),
            body: exchange.body().clone(),
            content_encoding: exchange.content_encoding().map(str::to_string),
        }
    }
}

/// Anything that can run decode jobs asynchronously.
///
/// Every call produces its own future; callers deduplicate.
pub trait BodyDecoder: Send + Sync {
    fn submit(&self, job: DecodeJob) -> BoxFuture<'static, Result<Bytes, DecodeError>>;
}
