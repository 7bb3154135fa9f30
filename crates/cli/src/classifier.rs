//! HTTP client for the external category classifier.
//!
//! Uses `ureq` (sync); callers on the async runtime go through
//! `classify_blocking`, which moves the call onto a blocking thread.

use std::sync::Arc;
use std::time::Duration;

use civic_engine::{Classification, Classifier, CollaboratorError};

const SERVICE: &str = "classifier";

/// Default request timeout when the config leaves it unset.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// POSTs `{"text": ...}` to `url` and expects
/// `{"categoryId", "confidence", "alternatives"}` back.
pub(crate) struct HttpClassifier {
    url: String,
    agent: ureq::Agent,
}

impl HttpClassifier {
    pub(crate) fn new(url: impl Into<String>, timeout_secs: Option<u64>) -> Self {
        let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            url: url.into(),
            agent,
        }
    }
}

impl Classifier for HttpClassifier {
    fn classify(&self, text: &str) -> Result<Classification, CollaboratorError> {
        let response = self
            .agent
            .post(&self.url)
            .send_json(serde_json::json!({ "text": text }))
            .map_err(|e| CollaboratorError::Unavailable {
                service: SERVICE,
                message: e.to_string(),
            })?;

        response
            .into_body()
            .read_json::<Classification>()
            .map_err(|e| CollaboratorError::Malformed {
                service: SERVICE,
                message: e.to_string(),
            })
    }
}

/// Classify `text` on a blocking thread. Failures are logged and treated as
/// "no suggestion"; intake never fails because the classifier is down.
pub(crate) async fn classify_blocking(
    classifier: Arc<dyn Classifier>,
    text: String,
) -> Option<Classification> {
    let joined = tokio::task::spawn_blocking(move || classifier.classify(&text)).await;
    match joined {
        Ok(Ok(classification)) => Some(classification),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "classification skipped");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "classifier task failed");
            None
        }
    }
}
