//! Core data models used throughout the interpolation pipeline.
//!
//! These types are request-scoped value objects: constructed fresh per
//! search or interpolation call, passed by move between pipeline stages,
//! and never mutated after construction.

use serde::{Deserialize, Serialize};

/// A retrieved diary fragment with similarity score and metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub text: String,
    pub metadata: PassageMeta,
    /// Similarity score from the index, higher is more relevant.
    /// No fixed bound is guaranteed.
    pub score: f32,
}

/// Metadata carried by a [`Passage`].
#[derive(Debug, Clone, Serialize)]
pub struct PassageMeta {
    /// ISO-8601 date of the source entry, empty if unresolvable.
    pub date: String,
    pub location: String,
}

/// Request body for an interpolation call.
#[derive(Debug, Clone, Deserialize)]
pub struct InterpolationRequest {
    /// Target date to interpolate (`YYYY-MM-DD`).
    pub date: String,
    /// Optional free-text hint from the user ("it rained that day").
    #[serde(default)]
    pub hint: Option<String>,
}

/// A past diary entry cited as evidence for the interpolated passage.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// First 100 characters of the cited passage, ellipsis-terminated.
    pub snippet: String,
    pub date: String,
}

/// Response body for an interpolation call.
///
/// Always structurally valid: retrieval or generation failures degrade the
/// `text` content, they never remove fields or abort the response.
#[derive(Debug, Clone, Serialize)]
pub struct InterpolationResponse {
    pub date: String,
    pub text: String,
    /// One citation per retrieved passage, in retrieval order.
    pub citations: Vec<Citation>,
}
