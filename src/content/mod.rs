//! Content type compatibility
//!
//! Decides which viewers a decoded body may be shown with, and tracks the
//! user's viewer choice for a body.

use crate::models::ContentType;

/// Viewers every body can fall back to
pub const FALLBACK_TYPES: [ContentType; 2] = [ContentType::Text, ContentType::Raw];

/// Viewer types for a body, most specific first and without duplicates.
///
/// The declared type leads, then the type implied by the raw `content-type`
/// header, then [`FALLBACK_TYPES`]. Missing or malformed input leaves just the
/// fallbacks.
pub fn compatible_types(
    declared: Option<ContentType>,
    content_type_header: Option<&str>,
) -> Vec<ContentType> {
    let header_type = content_type_header.and_then(ContentType::parse_mime);
    let candidates = declared
        .into_iter()
        .chain(header_type)
        .chain(FALLBACK_TYPES);

    let mut types = Vec::with_capacity(4);
    for candidate in candidates {
        if !types.contains(&candidate) {
            types.push(candidate);
        }
    }
    types
}

/// The viewer a user picked for one body, if it differs from the default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentTypeSelection {
    selected: Option<ContentType>,
}

impl ContentTypeSelection {
    /// Record a choice. Picking the declared type (or nothing) clears the
    /// override.
    pub fn select(&mut self, declared: ContentType, choice: Option<ContentType>) {
        self.selected = choice.filter(|choice| *choice != declared);
    }

    pub fn selected(&self) -> Option<ContentType> {
        self.selected
    }

    /// The type to render with: the selection while it is still compatible,
    /// otherwise the declared type.
    pub fn effective(&self, declared: ContentType, compatible: &[ContentType]) -> ContentType {
        match self.selected {
            Some(selected) if compatible.contains(&selected) => selected,
            _ => declared,
        }
    }
}
