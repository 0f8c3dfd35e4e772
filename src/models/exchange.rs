//! Captured exchange model
//!
//! One captured request or response body, as handed to the body viewer by the
//! capture layer. Exchanges are immutable once built and are shared as
//! `Arc<Exchange>`; caches key on the [`ExchangeId`] and hold only weak
//! references.

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::ContentType;

/// Identity of a captured exchange body.
///
/// Assigned once at capture time; two exchanges with identical bytes still
/// have distinct identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(uuid::Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which half of an HTTP transaction the body belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeSide {
    Request,
    Response,
}

/// A captured request or response body
#[derive(Debug)]
pub struct Exchange {
    id: ExchangeId,
    side: ExchangeSide,
    /// When the body was captured (milliseconds since epoch)
    captured_at: i64,
    headers: HashMap<String, String>,
    body: Bytes,
    content_type: ContentType,
}

impl Exchange {
    /// Build an exchange, classifying its content type from the
    /// `content-type` header.
    pub fn new(side: ExchangeSide, headers: HashMap<String, String>, body: impl Into<Bytes>) -> Self {
        let content_type = ContentType::from_mime(header_value(&headers, "content-type"));
        Self::with_content_type(side, headers, body, content_type)
    }

    /// Build an exchange with a content type already assigned upstream.
    pub fn with_content_type(
        side: ExchangeSide,
        headers: HashMap<String, String>,
        body: impl Into<Bytes>,
        content_type: ContentType,
    ) -> Self {
        Self {
            id: ExchangeId::new(),
            side,
            captured_at: Utc::now().timestamp_millis(),
            headers,
            body: body.into(),
            content_type,
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn side(&self) -> ExchangeSide {
        self.side
    }

    pub fn captured_at(&self) -> i64 {
        self.captured_at
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Raw body bytes exactly as captured (still content-encoded)
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Content type classified by the capture layer
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header("content-encoding")
    }

    pub fn content_type_header(&self) -> Option<&str> {
        self.header("content-type")
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
