//! Data models for the body viewer core
//!
//! Exchanges are produced by the capture layer; this crate only reads them.

pub mod content_type;
pub mod exchange;

pub use content_type::*;
pub use exchange::*;
