//! Per-pass counters returned by [`super::SyncEngine::run_sync_pass`].

use kb_sync_ports::LogFields;
use serde::Serialize;

/// Counts for one sync pass.
///
/// `created` and `updated` are counted when a file is classified, so a file
/// whose embedding later fails appears in both `created`/`updated` and
/// `errored`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Correlation id of the pass (`pass_N`).
    pub pass_id: String,
    /// Files listed by the file source.
    pub discovered: usize,
    /// Files examined before the pass ended.
    pub processed: usize,
    /// Files whose stored hash matched.
    pub skipped: usize,
    /// Files without a prior remote record.
    pub created: usize,
    /// Files whose remote record was stale.
    pub updated: usize,
    /// Read and embedding failures.
    pub errored: usize,
    /// Changed files with blank content, not embedded.
    pub blank: usize,
    /// Points acknowledged by the store.
    pub uploaded: usize,
    /// Lookups that failed and were treated as new.
    pub lookup_failures: usize,
    /// Batches flushed.
    pub batches: usize,
    /// Spot checks that found the point.
    pub verified: usize,
    /// Spot checks that did not.
    pub verify_failed: usize,
    /// The pass stopped early on shutdown.
    pub cancelled: bool,
    /// Wall time of the pass.
    pub duration_ms: u64,
}

impl SyncSummary {
    pub(crate) fn new(pass_id: impl Into<String>) -> Self {
        Self {
            pass_id: pass_id.into(),
            ..Self::default()
        }
    }

    /// Summary rendered as structured log fields.
    pub fn to_log_fields(&self) -> LogFields {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .map(|(key, value)| (key.into_boxed_str(), value))
                .collect(),
            _ => LogFields::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_camel_case_keys() {
        let summary = SyncSummary {
            lookup_failures: 2,
            verify_failed: 1,
            duration_ms: 40,
            ..SyncSummary::new("pass_7")
        };

        let fields = summary.to_log_fields();

        assert_eq!(fields.get("passId"), Some(&json!("pass_7")));
        assert_eq!(fields.get("lookupFailures"), Some(&json!(2)));
        assert_eq!(fields.get("verifyFailed"), Some(&json!(1)));
        assert_eq!(fields.get("cancelled"), Some(&json!(false)));
        assert_eq!(fields.len(), 15);
    }
}
