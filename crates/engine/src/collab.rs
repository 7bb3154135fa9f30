//! Contracts for external collaborators.
//!
//! The engine never authenticates, uploads or classifies by itself. The
//! identity provider supplies `Actor`; the object-storage uploader and the
//! category classifier return the shapes below.

use serde::{Deserialize, Serialize};

/// One photo as returned by the object-storage uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPhoto {
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
}

/// A ranked alternative category from the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAlternative {
    pub category_id: String,
    pub confidence: f64,
}

/// Classifier output for a report's free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub category_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<CategoryAlternative>,
}

impl Classification {
    /// Whether the top suggestion is trustworthy enough to apply.
    pub fn is_confident(&self, min_confidence: f64) -> bool {
        self.confidence.is_finite() && self.confidence >= min_confidence
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },
    #[error("malformed {service} response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },
}

/// Suggests a category for report text. Consumed only at report creation.
///
/// Implementations may block; async callers should run them on a blocking
/// thread.
pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<Classification, CollaboratorError>;
}
