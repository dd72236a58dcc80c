//! Remote references naming server-side media objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind tag the media server reports for pipelines
pub const MEDIA_PIPELINE_KIND: &str = "MediaPipeline";

/// Opaque descriptor of one server-side media object
///
/// Equality and hashing are structural over kind and id. The server is the
/// authority on identity and never reuses an id for a different object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaObjectRef {
    kind: String,
    id: String,
}

impl MediaObjectRef {
    /// Create a reference from the kind tag and id reported by the server
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Reference to a media pipeline
    pub fn pipeline(id: impl Into<String>) -> Self {
        Self::new(MEDIA_PIPELINE_KIND, id)
    }

    /// Kind tag (selects the proxy constructor)
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Server-issued id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this reference names a media pipeline
    pub fn is_pipeline(&self) -> bool {
        self.kind == MEDIA_PIPELINE_KIND
    }
}

impl fmt::Display for MediaObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}
