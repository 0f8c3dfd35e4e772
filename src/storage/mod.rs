//! Captured exchange storage
//!
//! In-memory ring of the exchanges currently open in the viewer. Dropping an
//! exchange from the ring evicts its decoded body from the cache.

mod exchange_store;

pub use exchange_store::*;
