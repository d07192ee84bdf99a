//! Closed media, target, and body-purpose enums plus document constants.
//!
//! Media kinds are a closed set: anything outside it is rejected with an
//! `UnsupportedShape` error rather than silently defaulted.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Schema version stamped on every persisted catcha document.
pub const CATCHA_SCHEMA_VERSION: &str = "1.2.0";

/// Canonical JSON-LD context IRI stamped on every catcha document.
pub const CATCHA_CONTEXT_IRI: &str =
    "http://catchpy.harvardx.harvard.edu/jsonld/catch_context_jsonld.json";

/// Platform name synthesized when a legacy document carries none.
pub const DEFAULT_PLATFORM_NAME: &str = "hxat";

/// Placeholder id for documents converted before an id is assigned.
/// Stripped again before the document leaves the converter.
pub const PLACEHOLDER_ID: &str = "id-to-be-assigned";

/// Value used for missing `context_id` / `collection_id` in legacy input.
pub const UNKNOWN_PLATFORM_FIELD: &str = "unknown";

/// AnnotatorJS `parent` value meaning "not a reply".
pub const NO_PARENT: &str = "0";

/// Maximum length of a tag value; longer tags are a validation error
/// before any row is written.
pub const MAX_TAG_LENGTH: usize = 256;

// ---------------------------------------------------------------------------
// Catcha media types
// ---------------------------------------------------------------------------

/// Media kind of a catcha target, as stored in the `type` field of each
/// target item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Annotation,
    Audio,
    Image,
    Text,
    Thumbnail,
    Video,
}

impl MediaType {
    /// Return the media type as stored in catcha documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annotation => "Annotation",
            Self::Audio => "Audio",
            Self::Image => "Image",
            Self::Text => "Text",
            Self::Thumbnail => "Thumbnail",
            Self::Video => "Video",
        }
    }

    /// Parse a catcha media type string. Unknown values are an
    /// unsupported-shape error, never a silent default.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "Annotation" => Ok(Self::Annotation),
            "Audio" => Ok(Self::Audio),
            "Image" => Ok(Self::Image),
            "Text" => Ok(Self::Text),
            "Thumbnail" => Ok(Self::Thumbnail),
            "Video" => Ok(Self::Video),
            other => Err(CoreError::UnsupportedShape(format!(
                "unknown media type '{other}'"
            ))),
        }
    }

    /// All valid media type strings.
    pub const ALL: &'static [&'static str] = &[
        "Annotation",
        "Audio",
        "Image",
        "Text",
        "Thumbnail",
        "Video",
    ];
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Target envelope type
// ---------------------------------------------------------------------------

/// Shape of the target (and selector) envelope: an ordered list or a
/// choice between alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetType {
    List,
    Choice,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "List",
            Self::Choice => "Choice",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "List" => Ok(Self::List),
            "Choice" => Ok(Self::Choice),
            other => Err(CoreError::UnsupportedShape(format!(
                "unknown target type '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Body item purpose
// ---------------------------------------------------------------------------

/// Purpose of a catcha body item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyPurpose {
    Commenting,
    Replying,
    Tagging,
}

impl BodyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commenting => "commenting",
            Self::Replying => "replying",
            Self::Tagging => "tagging",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "commenting" => Ok(Self::Commenting),
            "replying" => Ok(Self::Replying),
            "tagging" => Ok(Self::Tagging),
            other => Err(CoreError::UnsupportedShape(format!(
                "unknown body purpose '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for BodyPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AnnotatorJS media values
// ---------------------------------------------------------------------------

/// Media value of a legacy AnnotatorJS document (lowercase on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnojsMedia {
    Audio,
    Comment,
    Image,
    Text,
    Video,
}

impl AnnojsMedia {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Comment => "comment",
            Self::Image => "image",
            Self::Text => "text",
            Self::Video => "video",
        }
    }

    /// Parse a legacy media string. Anything else is a hard conversion
    /// failure ("unable to process media").
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "audio" => Ok(Self::Audio),
            "comment" => Ok(Self::Comment),
            "image" => Ok(Self::Image),
            "text" => Ok(Self::Text),
            "video" => Ok(Self::Video),
            other => Err(CoreError::UnsupportedShape(format!(
                "unable to process media '{other}'"
            ))),
        }
    }

    pub const ALL: &'static [&'static str] = &["audio", "comment", "image", "text", "video"];
}

impl std::fmt::Display for AnnojsMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
