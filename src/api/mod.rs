//! Public API surface
//!
//! Process-level entry points used by the viewer shell and the CLI.

pub mod body_api;
