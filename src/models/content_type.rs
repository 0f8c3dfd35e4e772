//! Content type tags
//!
//! The viewer categories a decoded body can be rendered as, plus the MIME
//! classification the capture layer uses to pick an exchange's default.

use serde::{Deserialize, Serialize};

/// Renderable content category for a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Raw,
    Json,
    Xml,
    Html,
    Css,
    Javascript,
    Markdown,
    Yaml,
    Image,
    Protobuf,
}

impl ContentType {
    /// Classify a `content-type` header value, falling back to `Raw` when the
    /// header is missing or unrecognised.
    pub fn from_mime(header: Option<&str>) -> Self {
        header
            .and_then(Self::parse_mime)
            .unwrap_or(ContentType::Raw)
    }

    /// Classify a MIME type. Parameters (`; charset=...`) are ignored.
    ///
    /// Returns `None` for values that are not of the form `type/subtype`.
    pub fn parse_mime(header: &str) -> Option<Self> {
        let essence = header.split(';').next()?.trim().to_ascii_lowercase();
        let (kind, subtype) = essence.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }

        let detected = match essence.as_str() {
            "application/json" | "text/json" => ContentType::Json,
            "text/html" | "application/xhtml+xml" => ContentType::Html,
            "application/xml" | "text/xml" => ContentType::Xml,
            "text/css" => ContentType::Css,
            "application/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "text/javascript" => ContentType::Javascript,
            "text/markdown" | "text/x-markdown" => ContentType::Markdown,
            "application/yaml" | "application/x-yaml" | "text/yaml" | "text/x-yaml" => {
                ContentType::Yaml
            }
            "application/protobuf"
            | "application/x-protobuf"
            | "application/vnd.google.protobuf" => ContentType::Protobuf,
            _ if subtype.ends_with("+json") => ContentType::Json,
            _ if subtype.ends_with("+xml") => ContentType::Xml,
            _ if kind == "image" => ContentType::Image,
            _ if kind == "text" => ContentType::Text,
            _ => ContentType::Raw,
        };
        Some(detected)
    }

    /// Label shown on the viewer selector
    pub fn display_name(&self) -> &'static str {
        match self {
            ContentType::Text => "Text",
            ContentType::Raw => "Hex",
            ContentType::Json => "JSON",
            ContentType::Xml => "XML",
            ContentType::Html => "HTML",
            ContentType::Css => "CSS",
            ContentType::Javascript => "JavaScript",
            ContentType::Markdown => "Markdown",
            ContentType::Yaml => "YAML",
            ContentType::Image => "Image",
            ContentType::Protobuf => "Protobuf",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_and_case_are_ignored() {
        assert_eq!(
            ContentType::parse_mime("Application/JSON; charset=utf-8"),
            Some(ContentType::Json)
        );
        assert_eq!(
            ContentType::parse_mime(" text/html ;charset=UTF-8"),
            Some(ContentType::Html)
        );
    }

    #[test]
    fn structured_suffixes_are_detected() {
        assert_eq!(
            ContentType::parse_mime("application/problem+json"),
            Some(ContentType::Json)
        );
        assert_eq!(
            ContentType::parse_mime("image/svg+xml"),
            Some(ContentType::Xml)
        );
        assert_eq!(
            ContentType::parse_mime("application/xhtml+xml"),
            Some(ContentType::Html)
        );
    }

    #[test]
    fn broad_families_fall_back_by_top_level_type() {
        assert_eq!(ContentType::parse_mime("image/png"), Some(ContentType::Image));
        assert_eq!(ContentType::parse_mime("text/csv"), Some(ContentType::Text));
        assert_eq!(
            ContentType::parse_mime("application/octet-stream"),
            Some(ContentType::Raw)
        );
    }

    #[test]
    fn malformed_headers_classify_as_raw() {
        assert_eq!(ContentType::parse_mime("nonsense"), None);
        assert_eq!(ContentType::parse_mime("text/"), None);
        assert_eq!(ContentType::parse_mime(""), None);
        assert_eq!(ContentType::from_mime(None), ContentType::Raw);
        assert_eq!(ContentType::from_mime(Some("/json")), ContentType::Raw);
    }
}
