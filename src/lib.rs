//! # Exchange Body Core
//!
//! Decoding and caching of captured HTTP bodies for the exchange viewer.
//!
//! ## Features
//!
//! - Content-encoding chains (gzip, deflate, brotli) undone in reverse order
//! - Decoding on a pool of worker threads behind a message boundary
//! - At most one decode per exchange, with resolve notifications
//! - Viewer content-type compatibility
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Viewer (ensure / read)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │   DecodedBodyCache ──── on_resolved ───▶ re-render       │
//! │          │                                               │
//! │          ▼                                               │
//! │   DecodeDispatcher ── JSON messages ──▶ worker threads   │
//! │                                          │               │
//! │                                          ▼               │
//! │                              codec chain (gzip/br/...)   │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod cache;
pub mod content;
pub mod decode;
pub mod models;
pub mod storage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
