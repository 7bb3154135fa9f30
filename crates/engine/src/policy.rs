//! Deployment-level policy switches.

use serde::{Deserialize, Serialize};

/// Default number of attempts for creating a transition's notifications.
pub const DEFAULT_DISPATCH_ATTEMPTS: u32 = 3;

/// Default minimum classifier confidence for auto-filling a category.
pub const DEFAULT_CLASSIFIER_MIN_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPolicy {
    /// Lets the assigned officer perform `awaiting_verification -> verified`.
    pub officer_may_verify: bool,
    pub dispatch_attempts: u32,
    pub classifier_min_confidence: f64,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            officer_may_verify: false,
            dispatch_attempts: DEFAULT_DISPATCH_ATTEMPTS,
            classifier_min_confidence: DEFAULT_CLASSIFIER_MIN_CONFIDENCE,
        }
    }
}

/// Visibility of soft-deleted reports in unfiltered listings.
///
/// Audit history is always queryable regardless of this setting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingPolicy {
    pub include_deleted: bool,
}
